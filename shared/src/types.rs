use std::collections::BTreeMap;
use std::net::IpAddr;
use std::str::FromStr;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use thiserror::Error;

/// IP namespace a target lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    pub const ALL: [AddressFamily; 2] = [AddressFamily::V4, AddressFamily::V6];

    pub fn of(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => AddressFamily::V4,
            IpAddr::V6(_) => AddressFamily::V6,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AddressFamily::V4 => "v4",
            AddressFamily::V6 => "v6",
        }
    }
}

/// Which table a row, status or group belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableType {
    Services,
    Aliases,
    Imports,
}

impl TableType {
    /// Default allocation preference when a worker doesn't pick a table.
    pub const ALL: [TableType; 3] = [TableType::Services, TableType::Aliases, TableType::Imports];

    pub fn as_str(&self) -> &'static str {
        match self {
            TableType::Services => "services",
            TableType::Aliases => "aliases",
            TableType::Imports => "imports",
        }
    }
}

/// Protocol a probe speaks to a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    StunMap,
    /// STUN server pair used for NAT change tests. Identity rests on the
    /// concrete IPs, so records of this kind never carry an alias.
    StunChange,
    Mqtt,
    Turn,
    Ntp,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 5] = [
        ServiceKind::StunMap,
        ServiceKind::StunChange,
        ServiceKind::Mqtt,
        ServiceKind::Turn,
        ServiceKind::Ntp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::StunMap => "stun_map",
            ServiceKind::StunChange => "stun_change",
            ServiceKind::Mqtt => "mqtt",
            ServiceKind::Turn => "turn",
            ServiceKind::Ntp => "ntp",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Udp,
    Tcp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Udp => "udp",
            Protocol::Tcp => "tcp",
        }
    }
}

/// Lifecycle of a status row, and the work-queue bin its group sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkStatus {
    Init,
    Available,
    Dealt,
    Disabled,
}

impl WorkStatus {
    pub const ALL: [WorkStatus; 4] = [
        WorkStatus::Init,
        WorkStatus::Available,
        WorkStatus::Dealt,
        WorkStatus::Disabled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkStatus::Init => "init",
            WorkStatus::Available => "available",
            WorkStatus::Dealt => "dealt",
            WorkStatus::Disabled => "disabled",
        }
    }
}

/// Returned when a stored tag doesn't name a known variant.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown tag {0:?}")]
pub struct UnknownTag(pub String);

fn parse_tag<T: Copy>(all: &[T], s: &str, name: impl Fn(&T) -> &'static str) -> Result<T, UnknownTag> {
    all.iter()
        .copied()
        .find(|v| name(v) == s)
        .ok_or_else(|| UnknownTag(s.to_string()))
}

impl FromStr for AddressFamily {
    type Err = UnknownTag;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_tag(&Self::ALL, s, Self::as_str)
    }
}

impl FromStr for TableType {
    type Err = UnknownTag;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_tag(&Self::ALL, s, Self::as_str)
    }
}

impl FromStr for ServiceKind {
    type Err = UnknownTag;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_tag(&Self::ALL, s, Self::as_str)
    }
}

impl FromStr for Protocol {
    type Err = UnknownTag;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_tag(&[Protocol::Udp, Protocol::Tcp], s, Self::as_str)
    }
}

impl FromStr for WorkStatus {
    type Err = UnknownTag;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_tag(&Self::ALL, s, Self::as_str)
    }
}

/// A worker asking for its next unit of work.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetWorkReq {
    /// Restrict to one address family; both when absent.
    pub af: Option<AddressFamily>,
    /// Restrict to one table; all tables when absent.
    pub table: Option<TableType>,
    pub current_time: Option<i64>,
    pub monitor_frequency: Option<i64>,
}

/// A group handed out to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkGrant {
    pub group_id: u64,
    pub table: TableType,
    pub af: AddressFamily,
    pub members: Vec<WorkMember>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "member", rename_all = "snake_case")]
pub enum WorkMember {
    Alias {
        id: u64,
        status_id: u64,
        fqn: String,
        ip: Option<IpAddr>,
    },
    Record {
        id: u64,
        status_id: u64,
        kind: ServiceKind,
        proto: Option<Protocol>,
        ip: Option<IpAddr>,
        port: u16,
        user: Option<String>,
        password: Option<String>,
        alias_id: Option<u64>,
        /// Name of the alias the record resolves through, if any
        fqn: Option<String>,
    },
}

impl WorkMember {
    pub fn status_id(&self) -> u64 {
        match self {
            WorkMember::Alias { status_id, .. } | WorkMember::Record { status_id, .. } => *status_id,
        }
    }
}

/// Outcome of one probe reported by a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkResult {
    pub status_id: u64,
    pub is_success: bool,
    pub t: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkDoneReq {
    pub statuses: Vec<WorkResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionOutcome {
    pub status_id: u64,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One service endpoint discovered by an import probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceData {
    pub kind: ServiceKind,
    pub af: AddressFamily,
    pub proto: Protocol,
    pub ip: Option<IpAddr>,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub alias_id: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertServicesReq {
    pub groups: Vec<Vec<ServiceData>>,
    /// Import status that produced these services, completed on insert
    pub status_id: Option<u64>,
    pub current_time: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertServicesResp {
    pub group_ids: Vec<u64>,
}

/// A candidate server to be confirmed by a one-shot import probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportReq {
    pub kind: ServiceKind,
    pub af: AddressFamily,
    pub proto: Option<Protocol>,
    pub ip: Option<IpAddr>,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub fqn: Option<String>,
    pub current_time: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportResp {
    pub id: u64,
    pub status_id: u64,
    pub group_id: u64,
    pub alias_id: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AliasUpdateReq {
    pub alias_id: u64,
    pub ip: IpAddr,
    pub current_time: Option<i64>,
}

/// One ranked endpoint in the public server listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerEntry {
    pub id: u64,
    pub group_id: u64,
    pub kind: ServiceKind,
    pub af: AddressFamily,
    pub proto: Option<Protocol>,
    pub ip: Option<IpAddr>,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Alias names currently resolving to `ip`
    pub fqns: Vec<String>,
    /// Average score of the entry's group
    pub score: f64,
    pub test_no: u64,
    pub failed_tests: u64,
    pub uptime: u64,
    pub max_uptime: u64,
    pub last_success: i64,
}

/// kind -> family -> protocol -> groups, best group first
pub type RankedServers = BTreeMap<String, BTreeMap<String, BTreeMap<String, Vec<Vec<ServerEntry>>>>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerList {
    pub servers: RankedServers,
    pub generated_at: DateTime<Utc>,
}

impl Default for ServerList {
    fn default() -> Self {
        Self {
            servers: RankedServers::new(),
            generated_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}
