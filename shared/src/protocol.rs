/// API paths served by the dealer
pub const PATH_WORK: &str = "/work";
pub const PATH_COMPLETE: &str = "/complete";
pub const PATH_INSERT: &str = "/insert";
pub const PATH_IMPORT: &str = "/import";
pub const PATH_ALIAS: &str = "/alias";
pub const PATH_SERVERS: &str = "/servers";
pub const PATH_SERVERS_HASH: &str = "/servers/hash";

/// Seconds a dealt group may stay out with a worker before it is reclaimed
pub const WORKER_TIMEOUT_SECS: i64 = 120;

/// Minimum seconds between two checks of the same available group
pub const MONITOR_FREQUENCY_SECS: i64 = 60 * 60;

/// Downtime tolerated before an alias may re-point a healthy record
pub const MAX_SERVER_DOWNTIME_SECS: i64 = 600;

/// Attempts an import gets before it is retired
pub const IMPORT_RETRY_CEILING: u64 = 3;
