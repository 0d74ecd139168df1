//! Embedder facade: one buffer pool, one transaction system, and a
//! minimal in-memory dictionary wiring the kernel pieces together.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ironbase_btree::{bulk_load, DTuple, Index, SpaceAlloc};
use ironbase_buf::{BufferPool, BufferPoolConfig};
use ironbase_error::Result;
use ironbase_trx::{roll, row, Table, TableResolver, Trx, TrxSys};
use ironbase_types::{rec, IndexId, RollPtr, TableId, TrxId, SYS_SPACE};
use parking_lot::RwLock;
use tracing::info;

/// First page number handed to user tables; lower numbers are reserved
/// for system pages (the trx-sys header and the system rseg among them).
const FIRST_USER_PAGE: u32 = 64;

#[derive(Default)]
struct EngineDict {
    tables: RwLock<HashMap<TableId, Arc<Table>>>,
}

impl TableResolver for EngineDict {
    fn table_by_id(&self, id: TableId) -> Option<Arc<Table>> {
        self.tables.read().get(&id).cloned()
    }
}

/// A wired-up storage kernel instance.
pub struct Engine {
    pool: Arc<BufferPool>,
    trx_sys: Arc<TrxSys>,
    alloc: SpaceAlloc,
    dict: Arc<EngineDict>,
    resolver: Arc<dyn TableResolver>,
    by_name: RwLock<HashMap<String, Arc<Table>>>,
    next_id: AtomicU64,
}

impl Engine {
    /// Create a fresh engine over an empty system tablespace.
    #[must_use]
    pub fn new(config: BufferPoolConfig) -> Self {
        let pool = BufferPool::new(config);
        let trx_sys = TrxSys::create(Arc::clone(&pool));
        let dict = Arc::new(EngineDict::default());
        let resolver: Arc<dyn TableResolver> = Arc::clone(&dict) as Arc<dyn TableResolver>;
        Self {
            pool,
            trx_sys,
            alloc: SpaceAlloc::new(SYS_SPACE, FIRST_USER_PAGE),
            dict,
            resolver,
            by_name: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    #[must_use]
    pub fn trx_sys(&self) -> &Arc<TrxSys> {
        &self.trx_sys
    }

    #[must_use]
    pub fn alloc(&self) -> &SpaceAlloc {
        &self.alloc
    }

    /// Create a table with an empty clustered index.
    pub fn create_table(&self, name: &str, n_fields: u16, n_uniq: u16) -> Result<Arc<Table>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let root = self.alloc.alloc();
        let index = Index::new(
            IndexId(id),
            format!("{name}_pk"),
            SYS_SPACE,
            root.page_no,
            n_fields,
            n_uniq,
        );
        bulk_load(&self.pool, &self.alloc, &index, &[], 64)?;
        let table = Table::new(TableId(id), name, index);
        self.dict.tables.write().insert(table.id(), Arc::clone(&table));
        self.by_name.write().insert(name.to_owned(), Arc::clone(&table));
        info!(table = name, root = %root, "table created");
        Ok(table)
    }

    /// Rebuild a table's tree from pre-committed rows (no undo history),
    /// `recs_per_leaf` rows per leaf. Intended for fixtures and loads.
    pub fn seed_table(
        &self,
        table: &Arc<Table>,
        rows: &[Vec<Vec<u8>>],
        recs_per_leaf: usize,
    ) -> Result<()> {
        let records: Vec<Vec<u8>> = rows
            .iter()
            .map(|fields| {
                let slices: Vec<&[u8]> = fields.iter().map(Vec::as_slice).collect();
                rec::encode(&slices, 0, TrxId(0), RollPtr::NULL)
            })
            .collect();
        bulk_load(&self.pool, &self.alloc, table.clust_index(), &records, recs_per_leaf)
    }

    #[must_use]
    pub fn table(&self, name: &str) -> Option<Arc<Table>> {
        self.by_name.read().get(name).cloned()
    }

    /// Start a transaction.
    #[must_use]
    pub fn begin(&self) -> Arc<Trx> {
        self.trx_sys.begin()
    }

    /// Commit a transaction in memory.
    pub fn commit(&self, trx: &Arc<Trx>) {
        self.trx_sys.commit_in_memory(trx);
    }

    /// Roll the transaction back completely.
    pub fn rollback(&self, trx: &Arc<Trx>) {
        roll::rollback(&self.trx_sys, trx, &self.resolver);
    }

    /// Roll back to a savepoint taken with [`Trx::undo_no`].
    pub fn rollback_to(&self, trx: &Arc<Trx>, savepoint: ironbase_types::UndoNo) {
        roll::rollback_to(&self.trx_sys, trx, savepoint, &self.resolver);
    }

    pub fn insert(&self, trx: &Arc<Trx>, table: &Arc<Table>, fields: &[&[u8]]) -> Result<()> {
        row::insert_row(&self.trx_sys, trx, table, fields)
    }

    pub fn update(
        &self,
        trx: &Arc<Trx>,
        table: &Arc<Table>,
        key: &DTuple,
        updates: &[(u16, &[u8])],
    ) -> Result<()> {
        row::update_row(&self.trx_sys, trx, table, key, updates)
    }

    pub fn delete_mark(&self, trx: &Arc<Trx>, table: &Arc<Table>, key: &DTuple) -> Result<()> {
        row::delete_mark_row(&self.trx_sys, trx, table, key)
    }

    /// Latest visible version of the row with `key`.
    pub fn get(&self, table: &Arc<Table>, key: &DTuple) -> Result<Option<Vec<Vec<u8>>>> {
        row::read_row(&self.trx_sys, table, key)
    }
}
