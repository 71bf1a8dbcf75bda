//! Table metadata registry.
//!
//! The master does not store table data; it tracks the shape of every
//! registered table (shard count, per-partition entry counts reported by
//! workers) and uses it to drive assignment and routing.

use std::collections::{BTreeMap, HashMap};

use tracing::warn;

use crate::messages::ShardInfo;
use crate::task::TableId;

/// Metadata for one partition of a table.
#[derive(Clone, Copy, Debug, Default)]
pub struct PartitionInfo {
    pub entries: u64,
}

/// Shape and per-partition metadata of one registered table.
#[derive(Clone, Debug)]
pub struct TableDescriptor {
    pub id: TableId,
    pub num_shards: u32,
    partitions: HashMap<u32, PartitionInfo>,
}

impl TableDescriptor {
    pub fn new(id: TableId, num_shards: u32) -> Self {
        Self {
            id,
            num_shards,
            partitions: HashMap::new(),
        }
    }

    pub fn partition(&self, shard: u32) -> Option<&PartitionInfo> {
        self.partitions.get(&shard)
    }

    pub fn update_partition(&mut self, info: &ShardInfo) {
        let partition = self.partitions.entry(info.shard).or_default();
        partition.entries = info.entries;
    }

    /// All shard indices of this table.
    pub fn shards(&self) -> impl Iterator<Item = u32> {
        0..self.num_shards
    }
}

/// Registry of every table the master coordinates.
#[derive(Debug, Default)]
pub struct TableRegistry {
    tables: BTreeMap<TableId, TableDescriptor>,
    next_id: u32,
}

impl TableRegistry {
    pub fn create_table(&mut self, num_shards: u32) -> TableId {
        let id = TableId(self.next_id);
        self.next_id += 1;
        self.tables.insert(id, TableDescriptor::new(id, num_shards));
        id
    }

    pub fn table(&self, id: TableId) -> Option<&TableDescriptor> {
        self.tables.get(&id)
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableDescriptor> {
        self.tables.values()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Fold a completion report into the owning table's partition metadata.
    pub fn update_partitions(&mut self, info: &ShardInfo) {
        match self.tables.get_mut(&info.table) {
            Some(table) => table.update_partition(info),
            None => warn!(table = info.table.0, "shard info for unknown table"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_table_assigns_sequential_ids() {
        let mut registry = TableRegistry::default();
        let a = registry.create_table(4);
        let b = registry.create_table(8);
        assert_eq!(a, TableId(0));
        assert_eq!(b, TableId(1));
        assert_eq!(registry.table(b).unwrap().num_shards, 8);
    }

    #[test]
    fn update_partitions_folds_entry_counts() {
        let mut registry = TableRegistry::default();
        let id = registry.create_table(2);
        registry.update_partitions(&ShardInfo {
            table: id,
            shard: 1,
            entries: 42,
        });
        let table = registry.table(id).unwrap();
        assert_eq!(table.partition(1).unwrap().entries, 42);
        assert!(table.partition(0).is_none());
    }
}
