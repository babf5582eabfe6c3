use std::path::Path;
use std::str::FromStr;
use anyhow::{Context, Result};
use rusqlite::{Connection, Transaction, params};
use shared::types::TableType;
use crate::store::model::{Alias, Credentials, Record, Status};
use crate::store::snapshot::Snapshot;

const RECORD_COLUMNS: &str =
    "id, kind, af, proto, ip, port, user, password, alias_id, status_id, group_id, score";

pub struct MirrorDb {
    conn: Connection,
}

impl MirrorDb {
    /// Open or create the SQLite database with WAL mode enabled
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .context("Failed to enable WAL mode")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS aliases (
                id        INTEGER PRIMARY KEY,
                af        TEXT NOT NULL,
                fqn       TEXT NOT NULL,
                ip        TEXT,
                group_id  INTEGER,
                status_id INTEGER NOT NULL,
                UNIQUE (af, fqn)
            );

            CREATE TABLE IF NOT EXISTS services (
                id        INTEGER PRIMARY KEY,
                kind      TEXT NOT NULL,
                af        TEXT NOT NULL,
                proto     TEXT,
                ip        TEXT,
                port      INTEGER NOT NULL,
                user      TEXT,
                password  TEXT,
                alias_id  INTEGER,
                status_id INTEGER NOT NULL,
                group_id  INTEGER,
                score     REAL NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS imports (
                id        INTEGER PRIMARY KEY,
                kind      TEXT NOT NULL,
                af        TEXT NOT NULL,
                proto     TEXT,
                ip        TEXT,
                port      INTEGER NOT NULL,
                user      TEXT,
                password  TEXT,
                alias_id  INTEGER,
                status_id INTEGER NOT NULL,
                group_id  INTEGER,
                score     REAL NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS status (
                id           INTEGER PRIMARY KEY,
                row_id       INTEGER NOT NULL,
                table_type   TEXT NOT NULL,
                status       TEXT NOT NULL,
                last_status  INTEGER NOT NULL,
                test_no      INTEGER NOT NULL,
                failed_tests INTEGER NOT NULL,
                last_success INTEGER NOT NULL,
                last_uptime  INTEGER NOT NULL,
                uptime       INTEGER NOT NULL,
                max_uptime   INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_services_group ON services(group_id);
            CREATE INDEX IF NOT EXISTS idx_imports_group ON imports(group_id);
            "#,
        )
        .context("Failed to create database schema")?;

        Ok(Self { conn })
    }

    /// Replace every mirrored row with `snapshot`, all in one transaction.
    pub fn replace_snapshot(&mut self, snapshot: &Snapshot) -> Result<()> {
        let tx = self.conn.transaction().context("Failed to begin transaction")?;

        tx.execute_batch(
            "DELETE FROM aliases; DELETE FROM services; DELETE FROM imports; DELETE FROM status;",
        )
        .context("Failed to clear mirror")?;

        for alias in &snapshot.aliases {
            tx.execute(
                "INSERT INTO aliases (id, af, fqn, ip, group_id, status_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    alias.id as i64,
                    alias.af.as_str(),
                    &alias.fqn,
                    alias.ip.map(|ip| ip.to_string()),
                    alias.group_id.map(|id| id as i64),
                    alias.status_id as i64,
                ],
            )
            .with_context(|| format!("Failed to mirror alias {}", alias.id))?;
        }

        for record in &snapshot.records {
            insert_record(&tx, record)?;
        }

        for status in &snapshot.statuses {
            tx.execute(
                "INSERT INTO status (
                    id, row_id, table_type, status, last_status, test_no, failed_tests,
                    last_success, last_uptime, uptime, max_uptime
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    status.id as i64,
                    status.row_id as i64,
                    status.table.as_str(),
                    status.status.as_str(),
                    status.last_status,
                    status.test_no as i64,
                    status.failed_tests as i64,
                    status.last_success,
                    status.last_uptime,
                    status.uptime as i64,
                    status.max_uptime as i64,
                ],
            )
            .with_context(|| format!("Failed to mirror status {}", status.id))?;
        }

        tx.commit().context("Failed to commit mirror snapshot")?;
        Ok(())
    }

    /// Read every mirrored row back, ordered by id within each table.
    pub fn load_snapshot(&self) -> Result<Snapshot> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, af, fqn, ip, group_id, status_id FROM aliases ORDER BY id")
            .context("Failed to prepare query")?;
        let aliases = stmt
            .query_map([], |row| Self::row_to_alias(row))
            .context("Failed to query aliases")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect aliases")?;

        let mut records = self.load_records(TableType::Services)?;
        records.extend(self.load_records(TableType::Imports)?);

        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, row_id, table_type, status, last_status, test_no, failed_tests,
                        last_success, last_uptime, uptime, max_uptime
                 FROM status ORDER BY id",
            )
            .context("Failed to prepare query")?;
        let statuses = stmt
            .query_map([], |row| Self::row_to_status(row))
            .context("Failed to query statuses")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect statuses")?;

        Ok(Snapshot {
            aliases,
            records,
            statuses,
        })
    }

    fn load_records(&self, table: TableType) -> Result<Vec<Record>> {
        let sql = format!("SELECT {} FROM {} ORDER BY id", RECORD_COLUMNS, table.as_str());
        let mut stmt = self.conn.prepare(&sql).context("Failed to prepare query")?;

        let records = stmt
            .query_map([], |row| Self::row_to_record(row, table))
            .with_context(|| format!("Failed to query {}", table.as_str()))?
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Failed to collect {}", table.as_str()))?;
        Ok(records)
    }

    fn row_to_alias(row: &rusqlite::Row) -> Result<Alias, rusqlite::Error> {
        Ok(Alias {
            id: get_u64(row, 0)?,
            af: parse_column(row, 1)?,
            fqn: row.get(2)?,
            ip: parse_optional_column(row, 3)?,
            group_id: get_optional_u64(row, 4)?,
            status_id: get_u64(row, 5)?,
        })
    }

    fn row_to_record(row: &rusqlite::Row, table: TableType) -> Result<Record, rusqlite::Error> {
        Ok(Record {
            id: get_u64(row, 0)?,
            table,
            kind: parse_column(row, 1)?,
            af: parse_column(row, 2)?,
            proto: parse_optional_column(row, 3)?,
            ip: parse_optional_column(row, 4)?,
            port: row.get::<_, u16>(5)?,
            credentials: Credentials::from_parts(row.get(6)?, row.get(7)?),
            alias_id: get_optional_u64(row, 8)?,
            status_id: get_u64(row, 9)?,
            group_id: get_optional_u64(row, 10)?,
            score: row.get(11)?,
        })
    }

    fn row_to_status(row: &rusqlite::Row) -> Result<Status, rusqlite::Error> {
        Ok(Status {
            id: get_u64(row, 0)?,
            row_id: get_u64(row, 1)?,
            table: parse_column(row, 2)?,
            status: parse_column(row, 3)?,
            last_status: row.get(4)?,
            test_no: get_u64(row, 5)?,
            failed_tests: get_u64(row, 6)?,
            last_success: row.get(7)?,
            last_uptime: row.get(8)?,
            uptime: get_u64(row, 9)?,
            max_uptime: get_u64(row, 10)?,
        })
    }
}

fn insert_record(tx: &Transaction, record: &Record) -> Result<()> {
    let credentials = record.credentials.clone().unwrap_or_default();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        record.table.as_str(),
        RECORD_COLUMNS
    );
    tx.execute(
        &sql,
        params![
            record.id as i64,
            record.kind.as_str(),
            record.af.as_str(),
            record.proto.map(|p| p.as_str()),
            record.ip.map(|ip| ip.to_string()),
            record.port,
            credentials.user,
            credentials.password,
            record.alias_id.map(|id| id as i64),
            record.status_id as i64,
            record.group_id.map(|id| id as i64),
            record.score,
        ],
    )
    .with_context(|| format!("Failed to mirror {} row {}", record.table.as_str(), record.id))?;
    Ok(())
}

fn conversion_error<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

fn get_u64(row: &rusqlite::Row, idx: usize) -> Result<u64, rusqlite::Error> {
    let value: i64 = row.get(idx)?;
    u64::try_from(value).map_err(|e| conversion_error(idx, e))
}

fn get_optional_u64(row: &rusqlite::Row, idx: usize) -> Result<Option<u64>, rusqlite::Error> {
    let value: Option<i64> = row.get(idx)?;
    value
        .map(|v| u64::try_from(v).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn parse_column<T>(row: &rusqlite::Row, idx: usize) -> Result<T, rusqlite::Error>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: String = row.get(idx)?;
    text.parse().map_err(|e| conversion_error(idx, e))
}

fn parse_optional_column<T>(row: &rusqlite::Row, idx: usize) -> Result<Option<T>, rusqlite::Error>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: Option<String> = row.get(idx)?;
    text.map(|t| t.parse().map_err(|e| conversion_error(idx, e)))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::types::{AddressFamily, Protocol, ServiceKind, WorkStatus};
    use crate::store::model::NewRecord;
    use crate::store::{NewImport, Store, StoreSettings};

    const T0: i64 = 1_700_000_000;

    fn test_store() -> Store {
        let mut store = Store::new(StoreSettings::default());
        let import = store
            .insert_import(
                NewImport {
                    record: NewRecord {
                        kind: ServiceKind::Turn,
                        af: AddressFamily::V4,
                        proto: Some(Protocol::Udp),
                        ip: None,
                        port: 3478,
                        credentials: Credentials::from_parts(Some("user".into()), Some("pass".into())),
                        alias_id: None,
                    },
                    fqn: Some("turn.example.net".to_string()),
                },
                T0,
            )
            .unwrap();
        store
            .resolve_alias(import.alias_id.unwrap(), "49.12.125.53".parse().unwrap(), T0)
            .unwrap();
        let group_id = store
            .insert_service_group(
                AddressFamily::V6,
                vec![NewRecord {
                    kind: ServiceKind::StunMap,
                    af: AddressFamily::V6,
                    proto: None,
                    ip: Some("2a01:4f8:c2c:1::1".parse().unwrap()),
                    port: 3478,
                    credentials: None,
                    alias_id: None,
                }],
                T0,
            )
            .unwrap();
        let record_status = store.records(TableType::Services).next().unwrap().status_id;
        store.complete(true, record_status, T0 + 30).unwrap();
        store.complete(true, record_status, T0 + 90).unwrap();
        store.refresh_scores();
        assert!(store.group(group_id).is_some());
        store
    }

    #[test]
    fn test_snapshot_round_trips_through_sqlite() {
        let mut db = MirrorDb::open(":memory:").unwrap();
        let snapshot = test_store().snapshot();

        db.replace_snapshot(&snapshot).unwrap();
        let loaded = db.load_snapshot().unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[test]
    fn test_replace_overwrites_previous_rows() {
        let mut db = MirrorDb::open(":memory:").unwrap();
        db.replace_snapshot(&test_store().snapshot()).unwrap();

        db.replace_snapshot(&Snapshot::default()).unwrap();
        assert!(db.load_snapshot().unwrap().is_empty());
    }

    #[test]
    fn test_failed_replace_keeps_last_good_snapshot() {
        let mut db = MirrorDb::open(":memory:").unwrap();
        let good = test_store().snapshot();
        db.replace_snapshot(&good).unwrap();

        // Two aliases with one key violate the table's UNIQUE constraint.
        let mut bad = good.clone();
        let mut dup = bad.aliases[0].clone();
        dup.id += 100;
        bad.aliases.push(dup);
        assert!(db.replace_snapshot(&bad).is_err());

        assert_eq!(db.load_snapshot().unwrap(), good);
    }

    #[test]
    fn test_rehydrate_from_mirror() {
        let mut db = MirrorDb::open(":memory:").unwrap();
        let store = test_store();
        db.replace_snapshot(&store.snapshot()).unwrap();

        let restored = Store::rehydrate(StoreSettings::default(), db.load_snapshot().unwrap(), T0 + 100).unwrap();
        assert_eq!(restored.counts(), store.counts());

        let queue = restored.queue(TableType::Services, AddressFamily::V6).unwrap();
        assert_eq!(queue.bin_len(WorkStatus::Init), 1);
        let alias = restored.find_alias(AddressFamily::V4, "turn.example.net").unwrap();
        assert_eq!(restored.fqns_for_ip(&"49.12.125.53".parse().unwrap()), vec![alias.fqn.clone()]);
    }

    #[test]
    fn test_corrupt_column_is_reported() {
        let mut db = MirrorDb::open(":memory:").unwrap();
        db.replace_snapshot(&test_store().snapshot()).unwrap();
        db.conn.execute("UPDATE services SET kind = 'gopher'", []).unwrap();
        assert!(db.load_snapshot().is_err());
    }
}
