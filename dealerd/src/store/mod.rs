//! In-memory dealer store: every alias, record, status and group, the
//! uniqueness indexes over them, and one work queue per (table, family).
//!
//! The store is single-writer. Each public `&mut self` method is one atomic
//! state transition and must not interleave with another; the daemon gets
//! this by owning the store on a single thread (see `store_manager`).
//! Nothing in here reads the clock or does I/O: callers pass `now`.

pub mod error;
pub mod linked_list;
pub mod model;
pub mod snapshot;
pub mod unique;
pub mod validate;
pub mod work_queue;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;
use shared::protocol::{IMPORT_RETRY_CEILING, MAX_SERVER_DOWNTIME_SECS, WORKER_TIMEOUT_SECS};
use shared::types::{AddressFamily, ServiceKind, TableType, WorkGrant, WorkMember, WorkStatus};
use crate::score;
use self::error::{StoreError, StoreResult};
use self::model::{alias_key, Alias, Group, Member, NewRecord, Record, RecordKey, Status};
use self::unique::UniqueIndex;
use self::validate::{
    ensure_family, ensure_ip_is_public, ensure_sane_time, is_public_ip, validate_fqn, validate_port,
};
use self::work_queue::WorkQueue;

/// Endpoints in a change-detection group: two IPs times two ports.
pub const CHANGE_GROUP_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreSettings {
    /// Seconds before dealt work is considered abandoned
    pub worker_timeout: i64,
    pub max_server_downtime: i64,
    /// Attempts after which an unconfirmed import is retired
    pub import_retry_ceiling: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            worker_timeout: WORKER_TIMEOUT_SECS,
            max_server_downtime: MAX_SERVER_DOWNTIME_SECS,
            import_retry_ceiling: IMPORT_RETRY_CEILING,
        }
    }
}

/// Fields for an import candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct NewImport {
    pub record: NewRecord,
    /// Name to resolve the target through; becomes the record's alias
    pub fqn: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreCounts {
    pub aliases: usize,
    pub services: usize,
    pub imports: usize,
    pub statuses: usize,
    pub groups: usize,
}

struct RecordTable {
    rows: BTreeMap<u64, Record>,
    unique: UniqueIndex<Record, RecordKey>,
    next_id: u64,
}

impl RecordTable {
    fn new(name: &'static str) -> Self {
        Self {
            rows: BTreeMap::new(),
            unique: UniqueIndex::new(name, Record::unique_key),
            next_id: 1,
        }
    }
}

pub struct Store {
    settings: StoreSettings,
    aliases: BTreeMap<u64, Alias>,
    alias_unique: UniqueIndex<Alias, (AddressFamily, String)>,
    services: RecordTable,
    imports: RecordTable,
    statuses: BTreeMap<u64, Status>,
    groups: BTreeMap<u64, Arc<Group>>,
    queues: HashMap<(TableType, AddressFamily), WorkQueue<Arc<Group>>>,
    /// alias id -> records resolving through it
    records_by_alias: HashMap<u64, Vec<(TableType, u64)>>,
    /// current alias IP -> aliases resolving to it
    aliases_by_ip: HashMap<IpAddr, Vec<u64>>,
    next_alias_id: u64,
    next_status_id: u64,
    next_group_id: u64,
}

fn take_id(counter: &mut u64) -> u64 {
    let id = *counter;
    *counter += 1;
    id
}

fn normalize_fqn(fqn: &str) -> String {
    fqn.trim_end_matches('.').to_ascii_lowercase()
}

impl Store {
    pub fn new(settings: StoreSettings) -> Self {
        let mut queues = HashMap::new();
        for table in TableType::ALL {
            for af in AddressFamily::ALL {
                queues.insert((table, af), WorkQueue::new());
            }
        }

        Self {
            settings,
            aliases: BTreeMap::new(),
            alias_unique: UniqueIndex::new("aliases", alias_key),
            services: RecordTable::new("services"),
            imports: RecordTable::new("imports"),
            statuses: BTreeMap::new(),
            groups: BTreeMap::new(),
            queues,
            records_by_alias: HashMap::new(),
            aliases_by_ip: HashMap::new(),
            next_alias_id: 1,
            next_status_id: 1,
            next_group_id: 1,
        }
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    pub fn alias(&self, id: u64) -> Option<&Alias> {
        self.aliases.get(&id)
    }

    pub fn find_alias(&self, af: AddressFamily, fqn: &str) -> Option<&Alias> {
        self.alias_unique
            .lookup_by_key(&(af, normalize_fqn(fqn)))
            .and_then(|id| self.aliases.get(&id))
    }

    pub fn record(&self, table: TableType, id: u64) -> Option<&Record> {
        self.record_table(table).ok()?.rows.get(&id)
    }

    pub fn records(&self, table: TableType) -> impl Iterator<Item = &Record> + '_ {
        self.record_table(table)
            .ok()
            .into_iter()
            .flat_map(|t| t.rows.values())
    }

    pub fn aliases(&self) -> impl Iterator<Item = &Alias> + '_ {
        self.aliases.values()
    }

    pub fn status(&self, id: u64) -> Option<&Status> {
        self.statuses.get(&id)
    }

    pub fn statuses(&self) -> impl Iterator<Item = &Status> + '_ {
        self.statuses.values()
    }

    pub fn group(&self, id: u64) -> Option<&Arc<Group>> {
        self.groups.get(&id)
    }

    pub fn groups(&self) -> impl Iterator<Item = &Arc<Group>> + '_ {
        self.groups.values()
    }

    pub fn queue(&self, table: TableType, af: AddressFamily) -> Option<&WorkQueue<Arc<Group>>> {
        self.queues.get(&(table, af))
    }

    /// Names of aliases currently resolving to `ip`, most recent first.
    pub fn fqns_for_ip(&self, ip: &IpAddr) -> Vec<String> {
        self.aliases_by_ip
            .get(ip)
            .map(|ids| {
                ids.iter()
                    .rev()
                    .filter_map(|id| self.aliases.get(id))
                    .map(|a| a.fqn.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn counts(&self) -> StoreCounts {
        StoreCounts {
            aliases: self.aliases.len(),
            services: self.services.rows.len(),
            imports: self.imports.rows.len(),
            statuses: self.statuses.len(),
            groups: self.groups.len(),
        }
    }

    fn record_table(&self, table: TableType) -> StoreResult<&RecordTable> {
        match table {
            TableType::Services => Ok(&self.services),
            TableType::Imports => Ok(&self.imports),
            TableType::Aliases => Err(StoreError::validation("aliases are not records")),
        }
    }

    fn record_table_mut(&mut self, table: TableType) -> StoreResult<&mut RecordTable> {
        match table {
            TableType::Services => Ok(&mut self.services),
            TableType::Imports => Ok(&mut self.imports),
            TableType::Aliases => Err(StoreError::validation("aliases are not records")),
        }
    }

    fn new_status(&mut self, row_id: u64, table: TableType, now: i64) -> u64 {
        let id = take_id(&mut self.next_status_id);
        self.statuses.insert(id, Status::new(id, row_id, table, now));
        id
    }

    fn index_alias_ip(&mut self, alias_id: u64, ip: IpAddr) {
        let ids = self.aliases_by_ip.entry(ip).or_default();
        if !ids.contains(&alias_id) {
            ids.push(alias_id);
        }
    }

    fn unindex_alias_ip(&mut self, alias_id: u64, ip: IpAddr) {
        if let Some(ids) = self.aliases_by_ip.get_mut(&ip) {
            ids.retain(|id| *id != alias_id);
            if ids.is_empty() {
                self.aliases_by_ip.remove(&ip);
            }
        }
    }

    /// Create an alias and queue its first resolution.
    pub fn insert_alias(&mut self, af: AddressFamily, fqn: &str, now: i64) -> StoreResult<Alias> {
        ensure_sane_time(now)?;
        validate_fqn(fqn)?;
        let alias = Alias {
            id: self.next_alias_id,
            af,
            fqn: normalize_fqn(fqn),
            ip: None,
            group_id: None,
            status_id: 0,
        };
        self.alias_unique.add(&alias, alias.id)?;

        let id = take_id(&mut self.next_alias_id);
        let status_id = self.new_status(id, TableType::Aliases, now);
        self.aliases.insert(id, Alias { status_id, ..alias });
        self.records_by_alias.insert(id, Vec::new());
        self.enqueue_group(af, TableType::Aliases, vec![Member::Alias(id)], now)?;

        tracing::debug!(alias_id = id, fqn, "inserted alias");
        self.aliases
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("alias", id))
    }

    pub fn lookup_or_insert_alias(&mut self, af: AddressFamily, fqn: &str, now: i64) -> StoreResult<Alias> {
        if let Some(alias) = self.find_alias(af, fqn) {
            return Ok(alias.clone());
        }
        self.insert_alias(af, fqn, now)
    }

    /// Validate `new` and build the row it would become, without touching
    /// any state.
    fn prepare_record(&self, table: TableType, new: NewRecord, id: u64) -> StoreResult<Record> {
        self.record_table(table)?;
        validate_port(new.port)?;
        if let Some(ip) = &new.ip {
            ensure_ip_is_public(ip)?;
            ensure_family(ip, new.af)?;
        }

        let alias_id = match new.alias_id {
            Some(alias_id) => {
                let alias = self
                    .aliases
                    .get(&alias_id)
                    .ok_or_else(|| StoreError::not_found("alias", alias_id))?;
                if alias.af != new.af {
                    return Err(StoreError::validation(format!(
                        "alias {} is {}, record is {}",
                        alias_id,
                        alias.af.as_str(),
                        new.af.as_str()
                    )));
                }
                // Change tests compare two concrete IPs; a name can't stand in.
                (new.kind != ServiceKind::StunChange).then_some(alias_id)
            }
            None => None,
        };

        if new.ip.is_none() && alias_id.is_none() {
            return Err(StoreError::InvalidTarget(format!(
                "{} record on port {} has neither an IP nor an alias",
                new.kind.as_str(),
                new.port
            )));
        }

        Ok(Record {
            id,
            table,
            kind: new.kind,
            af: new.af,
            proto: new.proto,
            ip: new.ip,
            port: new.port,
            credentials: new.credentials,
            alias_id,
            status_id: 0,
            group_id: None,
            score: 0.0,
        })
    }

    // `record` must be prepared and already present in the unique index.
    fn commit_record(&mut self, mut record: Record, now: i64) -> StoreResult<Record> {
        let table = record.table;
        record.status_id = self.new_status(record.id, table, now);
        if let Some(alias_id) = record.alias_id {
            self.records_by_alias
                .entry(alias_id)
                .or_default()
                .push((table, record.id));
        }

        let rows = self.record_table_mut(table)?;
        rows.next_id = rows.next_id.max(record.id + 1);
        rows.rows.insert(record.id, record.clone());
        Ok(record)
    }

    /// Insert a service or import row. The row is not queued until it is
    /// put in a group.
    pub fn insert_record(&mut self, table: TableType, new: NewRecord, now: i64) -> StoreResult<Record> {
        ensure_sane_time(now)?;
        let id = self.record_table(table)?.next_id;
        let record = self.prepare_record(table, new, id)?;
        self.record_table_mut(table)?.unique.add(&record, id)?;
        self.commit_record(record, now)
    }

    /// Insert an import candidate and queue it for its one-shot probe.
    pub fn insert_import(&mut self, new: NewImport, now: i64) -> StoreResult<Record> {
        ensure_sane_time(now)?;
        let NewImport { mut record, fqn } = new;

        if let Some(fqn) = &fqn {
            validate_fqn(fqn)?;
        }
        let uses_alias = fqn.is_some() && record.kind != ServiceKind::StunChange;
        if !uses_alias && record.ip.is_none() {
            return Err(StoreError::InvalidTarget(format!(
                "{} import on port {} has no usable address",
                record.kind.as_str(),
                record.port
            )));
        }

        // Everything that could still fail after the alias exists is checked
        // first, so a rejected import never leaves a stray alias behind.
        validate_port(record.port)?;
        if let Some(ip) = &record.ip {
            ensure_ip_is_public(ip)?;
            ensure_family(ip, record.af)?;
        }

        if let (true, Some(fqn)) = (uses_alias, &fqn) {
            record.alias_id = Some(self.lookup_or_insert_alias(record.af, fqn, now)?.id);
        }

        let af = record.af;
        let inserted = self.insert_record(TableType::Imports, record, now)?;
        let group_id = self.enqueue_group(af, TableType::Imports, vec![Member::Record(inserted.id)], now)?;
        Ok(Record {
            group_id: Some(group_id),
            ..inserted
        })
    }

    /// Insert a batch of service records and queue them as one group.
    /// Either every member is inserted or none is.
    pub fn insert_service_group(
        &mut self,
        af: AddressFamily,
        members: Vec<NewRecord>,
        now: i64,
    ) -> StoreResult<u64> {
        ensure_sane_time(now)?;
        if members.is_empty() {
            return Err(StoreError::validation("service group has no members"));
        }
        let change_members = members.iter().filter(|m| m.kind == ServiceKind::StunChange).count();
        if change_members > 0 && (change_members != members.len() || members.len() != CHANGE_GROUP_SIZE) {
            return Err(StoreError::validation(format!(
                "change groups need exactly {} change endpoints, got {} of {}",
                CHANGE_GROUP_SIZE,
                change_members,
                members.len()
            )));
        }

        let first_id = self.services.next_id;
        let mut prepared = Vec::with_capacity(members.len());
        let mut batch_keys = HashSet::new();
        for (offset, new) in members.into_iter().enumerate() {
            if new.af != af {
                return Err(StoreError::validation("service group mixes address families"));
            }
            let record = self.prepare_record(TableType::Services, new, first_id + offset as u64)?;
            let key = self.services.unique.key(&record);
            self.services.unique.ensure_free(&key)?;
            if !batch_keys.insert(key) {
                return Err(StoreError::DuplicateKey {
                    table: "services",
                    key: format!("{:?} repeated within group", key),
                });
            }
            prepared.push(record);
        }

        let mut ids = Vec::with_capacity(prepared.len());
        for record in prepared {
            self.services.unique.add(&record, record.id)?;
            ids.push(self.commit_record(record, now)?.id);
        }
        let members = ids.into_iter().map(Member::Record).collect();
        self.enqueue_group(af, TableType::Services, members, now)
    }

    fn member_owner(&self, table: TableType, member: Member) -> StoreResult<(AddressFamily, Option<u64>)> {
        match (table, member) {
            (TableType::Aliases, Member::Alias(id)) => self
                .aliases
                .get(&id)
                .map(|a| (a.af, a.group_id))
                .ok_or_else(|| StoreError::not_found("alias", id)),
            (TableType::Services | TableType::Imports, Member::Record(id)) => self
                .record_table(table)?
                .rows
                .get(&id)
                .map(|r| (r.af, r.group_id))
                .ok_or_else(|| StoreError::not_found("record", id)),
            _ => Err(StoreError::validation(format!(
                "{:?} can't be a member of a {} group",
                member,
                table.as_str()
            ))),
        }
    }

    fn set_member_group(&mut self, table: TableType, member: Member, group_id: u64) {
        match member {
            Member::Alias(id) => {
                if let Some(alias) = self.aliases.get_mut(&id) {
                    alias.group_id = Some(group_id);
                }
            }
            Member::Record(id) => {
                if let Ok(rows) = self.record_table_mut(table) {
                    if let Some(record) = rows.rows.get_mut(&id) {
                        record.group_id = Some(group_id);
                    }
                }
            }
        }
    }

    /// Group `members` into one unit of work and queue it in INIT.
    pub fn enqueue_group(
        &mut self,
        af: AddressFamily,
        table: TableType,
        members: Vec<Member>,
        now: i64,
    ) -> StoreResult<u64> {
        if members.is_empty() {
            return Err(StoreError::validation("group has no members"));
        }
        let mut seen = HashSet::new();
        for &member in &members {
            if !seen.insert(member) {
                return Err(StoreError::validation(format!("{:?} listed twice", member)));
            }
            let (member_af, group_id) = self.member_owner(table, member)?;
            if member_af != af {
                return Err(StoreError::validation(format!(
                    "{:?} is {}, group is {}",
                    member,
                    member_af.as_str(),
                    af.as_str()
                )));
            }
            if let Some(group_id) = group_id {
                return Err(StoreError::validation(format!(
                    "{:?} already belongs to group {}",
                    member, group_id
                )));
            }
        }

        let id = take_id(&mut self.next_group_id);
        let group = Arc::new(Group { id, table, af, members });
        self.queues
            .entry((table, af))
            .or_default()
            .add_work(id, Arc::clone(&group), WorkStatus::Init, now)?;
        for &member in &group.members {
            self.set_member_group(table, member, id);
        }
        self.groups.insert(id, group);
        Ok(id)
    }

    /// Pick the next group to check and mark it dealt.
    ///
    /// Tables and families are tried in the caller's order. Within one queue
    /// never-checked work wins, then available work whose last check is at
    /// least `monitor_frequency` old, then dealt work whose worker has timed
    /// out. Bins are kept oldest-touched first, so only the head of each bin
    /// needs looking at: if it isn't due, nothing behind it is.
    pub fn allocate(
        &mut self,
        afs: &[AddressFamily],
        tables: &[TableType],
        now: i64,
        monitor_frequency: i64,
    ) -> StoreResult<Option<Arc<Group>>> {
        let worker_timeout = self.settings.worker_timeout;
        for &table in tables {
            for &af in afs {
                let Some(queue) = self.queues.get_mut(&(table, af)) else {
                    continue;
                };
                if let Some(group) = take_due(queue, now, monitor_frequency, worker_timeout)? {
                    tracing::debug!(group_id = group.id, table = table.as_str(), af = af.as_str(), "allocated work");
                    return Ok(Some(group));
                }
            }
        }
        Ok(None)
    }

    fn owner_of(&self, status: &Status) -> StoreResult<(AddressFamily, Option<u64>)> {
        match status.table {
            TableType::Aliases => self
                .aliases
                .get(&status.row_id)
                .map(|a| (a.af, a.group_id))
                .ok_or_else(|| StoreError::not_found("alias", status.row_id)),
            table => self
                .record_table(table)?
                .rows
                .get(&status.row_id)
                .map(|r| (r.af, r.group_id))
                .ok_or_else(|| StoreError::not_found("record", status.row_id)),
        }
    }

    /// Apply one check result to a status and re-file its group.
    pub fn complete(&mut self, is_success: bool, status_id: u64, at_time: i64) -> StoreResult<()> {
        ensure_sane_time(at_time)?;
        let status = self
            .statuses
            .get(&status_id)
            .ok_or_else(|| StoreError::not_found("status", status_id))?;
        status.check_invariants()?;

        let table = status.table;
        let (af, group_id) = self.owner_of(status)?;
        let group_id = group_id.ok_or_else(|| StoreError::not_found("group for status", status_id))?;

        let retire = status.status == WorkStatus::Disabled
            || (table == TableType::Imports
                && (is_success || status.test_no >= self.settings.import_retry_ceiling));
        let destination = if retire {
            WorkStatus::Disabled
        } else {
            WorkStatus::Available
        };

        let mut updated = status.clone();
        record_check(&mut updated, is_success, destination, at_time);
        updated.check_invariants()?;

        self.queues
            .get_mut(&(table, af))
            .ok_or_else(|| StoreError::not_found("work", group_id))?
            .move_work(group_id, destination, at_time)?;

        let test_no = updated.test_no;
        self.statuses.insert(status_id, updated);

        tracing::debug!(
            status_id,
            is_success,
            destination = destination.as_str(),
            test_no,
            "completed check"
        );
        Ok(())
    }

    /// Point records of `table` that resolve through `alias_id` at `new_ip`,
    /// subject to the anti-flapping rules in [`should_repoint`]. Returns how
    /// many records changed.
    pub fn repoint(&mut self, table: TableType, new_ip: IpAddr, alias_id: u64, now: i64) -> StoreResult<usize> {
        let alias = self
            .aliases
            .get(&alias_id)
            .ok_or_else(|| StoreError::not_found("alias", alias_id))?;
        ensure_ip_is_public(&new_ip)?;
        ensure_family(&new_ip, alias.af)?;

        let max_downtime = self.settings.max_server_downtime;
        let rows = match table {
            TableType::Services => &mut self.services.rows,
            TableType::Imports => &mut self.imports.rows,
            TableType::Aliases => return Err(StoreError::validation("aliases are not records")),
        };
        let Some(dependents) = self.records_by_alias.get(&alias_id) else {
            return Ok(0);
        };

        let mut changed = 0;
        for &(record_table, row_id) in dependents {
            if record_table != table {
                continue;
            }
            let Some(record) = rows.get_mut(&row_id) else {
                continue;
            };
            let Some(status) = self.statuses.get(&record.status_id) else {
                continue;
            };
            if status.status == WorkStatus::Disabled || record.ip == Some(new_ip) {
                continue;
            }
            if should_repoint(record.ip, table, status, now, max_downtime) {
                tracing::debug!(record_id = row_id, old = ?record.ip, new = %new_ip, "re-pointed record");
                record.ip = Some(new_ip);
                changed += 1;
            }
        }
        Ok(changed)
    }

    /// Record a fresh resolution of an alias and propagate it to imports
    /// and then services.
    pub fn resolve_alias(&mut self, alias_id: u64, ip: IpAddr, now: i64) -> StoreResult<usize> {
        let alias = self
            .aliases
            .get(&alias_id)
            .ok_or_else(|| StoreError::not_found("alias", alias_id))?;
        ensure_ip_is_public(&ip)?;
        ensure_family(&ip, alias.af)?;
        let old_ip = alias.ip;

        if let Some(old) = old_ip {
            self.unindex_alias_ip(alias_id, old);
        }
        self.index_alias_ip(alias_id, ip);
        if let Some(alias) = self.aliases.get_mut(&alias_id) {
            alias.ip = Some(ip);
        }

        let imports = self.repoint(TableType::Imports, ip, alias_id, now)?;
        let services = self.repoint(TableType::Services, ip, alias_id, now)?;
        Ok(imports + services)
    }

    /// Expand a group into what a worker needs to probe it.
    pub fn work_grant(&self, group: &Group) -> StoreResult<WorkGrant> {
        let members = group
            .members
            .iter()
            .map(|member| match *member {
                Member::Alias(id) => {
                    let alias = self.aliases.get(&id).ok_or_else(|| StoreError::not_found("alias", id))?;
                    Ok(WorkMember::Alias {
                        id,
                        status_id: alias.status_id,
                        fqn: alias.fqn.clone(),
                        ip: alias.ip,
                    })
                }
                Member::Record(id) => {
                    let record = self
                        .record(group.table, id)
                        .ok_or_else(|| StoreError::not_found("record", id))?;
                    let credentials = record.credentials.clone().unwrap_or_default();
                    Ok(WorkMember::Record {
                        id,
                        status_id: record.status_id,
                        kind: record.kind,
                        proto: record.proto,
                        ip: record.ip,
                        port: record.port,
                        user: credentials.user,
                        password: credentials.password,
                        alias_id: record.alias_id,
                        fqn: record
                            .alias_id
                            .and_then(|a| self.aliases.get(&a))
                            .map(|a| a.fqn.clone()),
                    })
                }
            })
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(WorkGrant {
            group_id: group.id,
            table: group.table,
            af: group.af,
            members,
        })
    }

    /// Recompute service scores, caching each group's average on its members.
    pub fn refresh_scores(&mut self) {
        let service_groups: Vec<Arc<Group>> = self
            .groups
            .values()
            .filter(|g| g.table == TableType::Services)
            .cloned()
            .collect();

        for group in service_groups {
            let scores: Vec<f64> = group
                .members
                .iter()
                .filter_map(|m| match m {
                    Member::Record(id) => self.services.rows.get(id),
                    Member::Alias(_) => None,
                })
                .filter_map(|r| self.statuses.get(&r.status_id))
                .map(|s| score::score(s, None))
                .collect();
            if scores.is_empty() {
                continue;
            }
            let average = scores.iter().sum::<f64>() / scores.len() as f64;
            for member in &group.members {
                if let Member::Record(id) = member {
                    if let Some(record) = self.services.rows.get_mut(id) {
                        record.score = average;
                    }
                }
            }
        }
    }
}

/// Head of the first due bin in INIT, AVAILABLE, DEALT order, moved to DEALT.
fn take_due(
    queue: &mut WorkQueue<Arc<Group>>,
    now: i64,
    monitor_frequency: i64,
    worker_timeout: i64,
) -> StoreResult<Option<Arc<Group>>> {
    for bin in [WorkStatus::Init, WorkStatus::Available, WorkStatus::Dealt] {
        let Some(entry) = queue.oldest(bin) else {
            continue;
        };
        let elapsed = (now - entry.touched).max(0);
        let due = match bin {
            WorkStatus::Init => true,
            WorkStatus::Available => elapsed >= monitor_frequency,
            WorkStatus::Dealt => elapsed >= worker_timeout,
            WorkStatus::Disabled => false,
        };
        if !due {
            continue;
        }

        let (id, group) = (entry.id, Arc::clone(&entry.payload));
        queue.move_work(id, WorkStatus::Dealt, now)?;
        return Ok(Some(group));
    }
    Ok(None)
}

/// Fold one check result into a status.
fn record_check(status: &mut Status, is_success: bool, destination: WorkStatus, at_time: i64) {
    if is_success {
        let gained = if status.last_uptime == 0 {
            0
        } else {
            (at_time - status.last_uptime).max(0) as u64
        };
        status.uptime += gained;
        status.max_uptime = status.max_uptime.max(status.uptime);
        status.last_uptime = at_time;
        status.last_success = at_time;
    } else {
        status.failed_tests += 1;
        status.uptime = 0;
    }

    status.test_no += 1;
    status.status = destination;
    status.last_status = at_time;
}

/// Whether a record currently at `current` should take an alias's new IP.
///
/// Unusable addresses and untested imports are replaced outright. Anything
/// else only moves after a sustained outage, so a transient DNS answer
/// can't break a pairing that a group relies on.
pub fn should_repoint(
    current: Option<IpAddr>,
    table: TableType,
    status: &Status,
    now: i64,
    max_server_downtime: i64,
) -> bool {
    if !current.map(|ip| is_public_ip(&ip)).unwrap_or(false) {
        return true;
    }
    if table == TableType::Imports && status.test_no == 0 {
        return true;
    }

    let never_up = status.last_success == 0 && status.last_uptime == 0;
    if never_up && status.test_no >= 2 {
        return true;
    }
    status.last_success != 0 && now - status.last_uptime > 2 * max_server_downtime
}
