pub mod hash;

use chrono::{DateTime, Utc};
use shared::types::{RankedServers, ServerEntry, ServerList, TableType};
use crate::score;
use crate::store::model::{Group, Member};
use crate::store::Store;

/// Listing key for records that don't name a transport.
const ANY_PROTO: &str = "any";

/// Build the public ranked listing of service groups.
///
/// Each group's members all carry the group's average score. Lists are
/// ordered best group first, ties broken by group id.
pub fn build_server_list(store: &Store, now: DateTime<Utc>) -> ServerList {
    let mut servers = RankedServers::new();

    for group in store.groups().filter(|g| g.table == TableType::Services) {
        let mut entries = group_entries(store, group);
        if entries.is_empty() {
            continue;
        }
        let average = entries.iter().map(|e| e.score).sum::<f64>() / entries.len() as f64;
        for entry in &mut entries {
            entry.score = average;
        }

        let first = &entries[0];
        let proto = first.proto.map(|p| p.as_str()).unwrap_or(ANY_PROTO);
        servers
            .entry(first.kind.as_str().to_string())
            .or_default()
            .entry(first.af.as_str().to_string())
            .or_default()
            .entry(proto.to_string())
            .or_default()
            .push(entries);
    }

    for groups in servers.values_mut().flat_map(|by_af| by_af.values_mut()).flat_map(|by_proto| by_proto.values_mut()) {
        groups.sort_by(|a, b| {
            b[0].score
                .total_cmp(&a[0].score)
                .then(a[0].group_id.cmp(&b[0].group_id))
        });
    }

    ServerList {
        servers,
        generated_at: now,
    }
}

fn group_entries(store: &Store, group: &Group) -> Vec<ServerEntry> {
    group
        .members
        .iter()
        .filter_map(|member| match member {
            Member::Record(id) => store.record(group.table, *id),
            Member::Alias(_) => None,
        })
        .filter_map(|record| {
            let status = store.status(record.status_id)?;
            let credentials = record.credentials.clone().unwrap_or_default();
            Some(ServerEntry {
                id: record.id,
                group_id: group.id,
                kind: record.kind,
                af: record.af,
                proto: record.proto,
                ip: record.ip,
                port: record.port,
                user: credentials.user,
                password: credentials.password,
                fqns: record.ip.map(|ip| store.fqns_for_ip(&ip)).unwrap_or_default(),
                score: score::score(status, None),
                test_no: status.test_no,
                failed_tests: status.failed_tests,
                uptime: status.uptime,
                max_uptime: status.max_uptime,
                last_success: status.last_success,
            })
        })
        .collect()
}
