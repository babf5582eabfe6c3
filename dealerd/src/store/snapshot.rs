use std::collections::BTreeMap;
use std::sync::Arc;
use shared::types::{AddressFamily, TableType, WorkStatus};
use crate::store::error::{StoreError, StoreResult};
use crate::store::model::{Alias, Group, Member, Record, Status};
use crate::store::{Store, StoreSettings};

/// Every row the store holds, in id order. This is what the mirror writes
/// and what a restart reloads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub aliases: Vec<Alias>,
    pub records: Vec<Record>,
    pub statuses: Vec<Status>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty() && self.records.is_empty() && self.statuses.is_empty()
    }
}

impl Store {
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            aliases: self.aliases.values().cloned().collect(),
            records: self
                .services
                .rows
                .values()
                .chain(self.imports.rows.values())
                .cloned()
                .collect(),
            statuses: self.statuses.values().cloned().collect(),
        }
    }

    /// Rebuild a store from mirrored rows: indexes, alias back-references,
    /// groups and work queues.
    ///
    /// Groups whose members are all disabled go straight to DISABLED; every
    /// other group restarts in INIT and is re-checked first.
    pub fn rehydrate(settings: StoreSettings, snapshot: Snapshot, now: i64) -> StoreResult<Store> {
        let mut store = Store::new(settings);

        for status in snapshot.statuses {
            status.check_invariants()?;
            store.next_status_id = store.next_status_id.max(status.id + 1);
            store.statuses.insert(status.id, status);
        }

        let mut groups: BTreeMap<(TableType, u64), Vec<(Member, AddressFamily, u64)>> = BTreeMap::new();

        for alias in snapshot.aliases {
            store.check_back_reference(alias.status_id, alias.id, TableType::Aliases)?;
            store.alias_unique.add(&alias, alias.id)?;
            store.next_alias_id = store.next_alias_id.max(alias.id + 1);
            store.records_by_alias.entry(alias.id).or_default();
            if let Some(ip) = alias.ip {
                store.index_alias_ip(alias.id, ip);
            }
            if let Some(group_id) = alias.group_id {
                groups
                    .entry((TableType::Aliases, group_id))
                    .or_default()
                    .push((Member::Alias(alias.id), alias.af, alias.status_id));
            }
            store.aliases.insert(alias.id, alias);
        }

        for record in snapshot.records {
            let table = record.table;
            store.check_back_reference(record.status_id, record.id, table)?;
            if let Some(alias_id) = record.alias_id {
                if !store.aliases.contains_key(&alias_id) {
                    return Err(StoreError::not_found("alias", alias_id));
                }
                store
                    .records_by_alias
                    .entry(alias_id)
                    .or_default()
                    .push((table, record.id));
            }
            if let Some(group_id) = record.group_id {
                groups
                    .entry((table, group_id))
                    .or_default()
                    .push((Member::Record(record.id), record.af, record.status_id));
            }

            let rows = store.record_table_mut(table)?;
            rows.unique.add(&record, record.id)?;
            rows.next_id = rows.next_id.max(record.id + 1);
            rows.rows.insert(record.id, record);
        }

        for ((table, group_id), members) in groups {
            let af = members[0].1;
            if members.iter().any(|(_, member_af, _)| *member_af != af) {
                return Err(StoreError::InvariantViolation(format!(
                    "group {} mixes address families",
                    group_id
                )));
            }
            let all_disabled = members.iter().all(|(_, _, status_id)| {
                store
                    .statuses
                    .get(status_id)
                    .map(|s| s.status == WorkStatus::Disabled)
                    .unwrap_or(false)
            });
            let bin = if all_disabled {
                WorkStatus::Disabled
            } else {
                WorkStatus::Init
            };

            let group = Arc::new(Group {
                id: group_id,
                table,
                af,
                members: members.into_iter().map(|(member, _, _)| member).collect(),
            });
            store
                .queues
                .entry((table, af))
                .or_default()
                .add_work(group_id, Arc::clone(&group), bin, now)?;
            store.groups.insert(group_id, group);
            store.next_group_id = store.next_group_id.max(group_id + 1);
        }

        Ok(store)
    }

    fn check_back_reference(&self, status_id: u64, row_id: u64, table: TableType) -> StoreResult<()> {
        let status = self
            .statuses
            .get(&status_id)
            .ok_or_else(|| StoreError::not_found("status", status_id))?;
        if status.row_id != row_id || status.table != table {
            return Err(StoreError::InvariantViolation(format!(
                "status {} belongs to {} {}, not {} {}",
                status_id,
                status.table.as_str(),
                status.row_id,
                table.as_str(),
                row_id
            )));
        }
        Ok(())
    }
}
