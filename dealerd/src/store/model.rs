use std::net::IpAddr;
use shared::types::{AddressFamily, Protocol, ServiceKind, TableType, WorkStatus};
use crate::store::error::{StoreError, StoreResult};
use crate::store::validate::is_sane_time;

/// A DNS name standing in for the address of one or more records.
#[derive(Debug, Clone, PartialEq)]
pub struct Alias {
    pub id: u64,
    pub af: AddressFamily,
    pub fqn: String,
    pub ip: Option<IpAddr>,
    pub group_id: Option<u64>,
    pub status_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Credentials {
    pub user: Option<String>,
    pub password: Option<String>,
}

impl Credentials {
    pub fn from_parts(user: Option<String>, password: Option<String>) -> Option<Self> {
        if user.is_none() && password.is_none() {
            return None;
        }
        Some(Self { user, password })
    }
}

/// A service or import endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: u64,
    pub table: TableType,
    pub kind: ServiceKind,
    pub af: AddressFamily,
    pub proto: Option<Protocol>,
    pub ip: Option<IpAddr>,
    pub port: u16,
    pub credentials: Option<Credentials>,
    pub alias_id: Option<u64>,
    pub status_id: u64,
    pub group_id: Option<u64>,
    /// Last computed group score
    pub score: f64,
}

/// What a record's identity rests on: its alias when it has one, so a later
/// IP change can't make it collide with an unrelated record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Alias(u64),
    Ip(IpAddr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub kind: ServiceKind,
    pub af: AddressFamily,
    pub proto: Option<Protocol>,
    pub target: Option<Target>,
    pub port: u16,
}

impl Record {
    pub fn target(&self) -> Option<Target> {
        match (self.alias_id, self.ip) {
            (Some(alias_id), _) => Some(Target::Alias(alias_id)),
            (None, Some(ip)) => Some(Target::Ip(ip)),
            (None, None) => None,
        }
    }

    pub fn unique_key(&self) -> RecordKey {
        RecordKey {
            kind: self.kind,
            af: self.af,
            proto: self.proto,
            target: self.target(),
            port: self.port,
        }
    }
}

pub fn alias_key(alias: &Alias) -> (AddressFamily, String) {
    (alias.af, alias.fqn.clone())
}

/// Fields a caller supplies to create a record.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    pub kind: ServiceKind,
    pub af: AddressFamily,
    pub proto: Option<Protocol>,
    pub ip: Option<IpAddr>,
    pub port: u16,
    pub credentials: Option<Credentials>,
    pub alias_id: Option<u64>,
}

/// Check history of one alias or record.
#[derive(Debug, Clone, PartialEq)]
pub struct Status {
    pub id: u64,
    pub row_id: u64,
    pub table: TableType,
    pub status: WorkStatus,
    pub last_status: i64,
    pub test_no: u64,
    pub failed_tests: u64,
    pub last_success: i64,
    /// End of the current success streak, 0 when no streak is open
    pub last_uptime: i64,
    pub uptime: u64,
    pub max_uptime: u64,
}

impl Status {
    pub fn new(id: u64, row_id: u64, table: TableType, now: i64) -> Self {
        Self {
            id,
            row_id,
            table,
            status: WorkStatus::Init,
            last_status: now,
            test_no: 0,
            failed_tests: 0,
            last_success: 0,
            last_uptime: 0,
            uptime: 0,
            max_uptime: 0,
        }
    }

    pub fn check_invariants(&self) -> StoreResult<()> {
        if self.max_uptime < self.uptime {
            return Err(StoreError::InvariantViolation(format!(
                "status {}: max_uptime {} < uptime {}",
                self.id, self.max_uptime, self.uptime
            )));
        }
        if self.test_no < self.failed_tests {
            return Err(StoreError::InvariantViolation(format!(
                "status {}: test_no {} < failed_tests {}",
                self.id, self.test_no, self.failed_tests
            )));
        }
        for (name, t) in [
            ("last_status", self.last_status),
            ("last_success", self.last_success),
            ("last_uptime", self.last_uptime),
        ] {
            if !is_sane_time(t) {
                return Err(StoreError::InvariantViolation(format!(
                    "status {}: {} {} out of range",
                    self.id, name, t
                )));
            }
        }
        Ok(())
    }
}

/// One unit of allocatable work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Member {
    Alias(u64),
    Record(u64),
}

/// Members that are allocated and completed together. Never changes once
/// enqueued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub id: u64,
    pub table: TableType,
    pub af: AddressFamily,
    pub members: Vec<Member>,
}
