use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use crate::store::error::{StoreError, StoreResult};

/// Compound-key uniqueness over one table's rows.
///
/// The key is derived from a row by a per-table function, and maps back to
/// the row's id. This is the only duplicate check on insert.
pub struct UniqueIndex<E, K> {
    table: &'static str,
    key_of: fn(&E) -> K,
    entries: HashMap<K, u64>,
}

impl<E, K> UniqueIndex<E, K>
where
    K: Eq + Hash + Clone + Debug,
{
    pub fn new(table: &'static str, key_of: fn(&E) -> K) -> Self {
        Self {
            table,
            key_of,
            entries: HashMap::new(),
        }
    }

    pub fn key(&self, entity: &E) -> K {
        (self.key_of)(entity)
    }

    /// Index `entity` under `id`, refusing a key that is already taken.
    pub fn add(&mut self, entity: &E, id: u64) -> StoreResult<K> {
        let key = self.key(entity);
        self.ensure_free(&key)?;
        self.entries.insert(key.clone(), id);
        Ok(key)
    }

    pub fn ensure_free(&self, key: &K) -> StoreResult<()> {
        if self.entries.contains_key(key) {
            return Err(StoreError::DuplicateKey {
                table: self.table,
                key: format!("{:?}", key),
            });
        }
        Ok(())
    }

    pub fn lookup_by_key(&self, key: &K) -> Option<u64> {
        self.entries.get(key).copied()
    }

    pub fn all(&self) -> impl Iterator<Item = u64> + '_ {
        self.entries.values().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Row {
        name: &'static str,
        port: u16,
    }

    fn row_key(row: &Row) -> (&'static str, u16) {
        (row.name, row.port)
    }

    #[test]
    fn test_add_and_lookup() {
        let mut index = UniqueIndex::new("rows", row_key);
        index.add(&Row { name: "a", port: 1 }, 10).unwrap();
        index.add(&Row { name: "a", port: 2 }, 11).unwrap();

        assert_eq!(index.lookup_by_key(&("a", 2)), Some(11));
        assert_eq!(index.lookup_by_key(&("b", 1)), None);

        let mut ids: Vec<u64> = index.all().collect();
        ids.sort();
        assert_eq!(ids, vec![10, 11]);
    }

    #[test]
    fn test_duplicate_rejected_without_overwrite() {
        let mut index = UniqueIndex::new("rows", row_key);
        index.add(&Row { name: "a", port: 1 }, 10).unwrap();

        let err = index.add(&Row { name: "a", port: 1 }, 99).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { table: "rows", .. }));
        assert_eq!(index.lookup_by_key(&("a", 1)), Some(10));
        assert_eq!(index.len(), 1);
    }
}
