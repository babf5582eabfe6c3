use std::net::IpAddr;
use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Sha256, Digest};
use shared::types::{ServerList, ServerEntry};

/// Hash only what a client would act on: the generation time, and the raw
/// counters already folded into `score`, change on every refresh.
#[derive(Serialize)]
struct HashView<'a> {
    kind: &'a str,
    af: &'a str,
    proto: &'a str,
    group_id: u64,
    id: u64,
    ip: Option<IpAddr>,
    port: u16,
    user: Option<&'a str>,
    password: Option<&'a str>,
    fqns: &'a [String],
    score: f64,
}

impl<'a> HashView<'a> {
    fn new(kind: &'a str, af: &'a str, proto: &'a str, e: &'a ServerEntry) -> Self {
        Self {
            kind,
            af,
            proto,
            group_id: e.group_id,
            id: e.id,
            ip: e.ip,
            port: e.port,
            user: e.user.as_deref(),
            password: e.password.as_deref(),
            fqns: &e.fqns,
            score: e.score,
        }
    }
}

/// SHA-256 (hex) of a listing. Map keys are ordered, so equal listings hash
/// equally regardless of when they were built.
pub fn compute_hash(list: &ServerList) -> Result<String> {
    let mut views = Vec::new();
    for (kind, by_af) in &list.servers {
        for (af, by_proto) in by_af {
            for (proto, groups) in by_proto {
                views.extend(
                    groups
                        .iter()
                        .flatten()
                        .map(|e| HashView::new(kind, af, proto, e)),
                );
            }
        }
    }

    let json = serde_json::to_string(&views)
        .context("Failed to serialize server list for hashing")?;

    let hash = Sha256::digest(json.as_bytes());
    Ok(hex::encode(hash))
}
