//! Minimal dictionary objects: just enough table metadata for the undo
//! engine to find a row's clustered index. The full dictionary lives
//! outside the kernel.

use std::sync::Arc;

use ironbase_btree::Index;
use ironbase_types::TableId;

/// A table: identity plus its clustered index.
#[derive(Debug)]
pub struct Table {
    id: TableId,
    name: String,
    clust_index: Arc<Index>,
}

impl Table {
    #[must_use]
    pub fn new(id: TableId, name: impl Into<String>, clust_index: Arc<Index>) -> Arc<Self> {
        Arc::new(Self { id, name: name.into(), clust_index })
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> TableId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The clustered index holding the table's rows.
    #[must_use]
    pub fn clust_index(&self) -> &Arc<Index> {
        &self.clust_index
    }
}

/// Resolves the table an undo record refers to. Implemented by whatever
/// owns the dictionary; the undo engine only reads through it while
/// holding the dictionary operation lock.
pub trait TableResolver: Send + Sync {
    fn table_by_id(&self, id: TableId) -> Option<Arc<Table>>;
}
