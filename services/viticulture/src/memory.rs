//! In-process store with the same replace-all semantics as Postgres.
//! Used by `parser --dry-run` and by the pipeline tests.

use anyhow::{bail, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::category::Category;
use crate::query::PageQuery;
use crate::record::{Record, StoredRecord};
use crate::store::{LoadTransaction, ReportStore};

#[derive(Debug, Default, Clone)]
struct Tables {
    rows: HashMap<Category, Vec<StoredRecord>>,
    // Ids keep growing across replaces, like a BIGSERIAL sequence.
    next_id: HashMap<Category, i64>,
}

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    fail_insert_after: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every transaction reject its insert number `n + 1` (0-based `n`).
    pub fn fail_insert_after(mut self, n: usize) -> Self {
        self.fail_insert_after = Some(n);
        self
    }

    pub async fn count(&self, category: Category) -> usize {
        let tables = self.tables.lock().await;
        tables.rows.get(&category).map_or(0, Vec::len)
    }
}

pub struct MemoryTx {
    target: Arc<Mutex<Tables>>,
    staged: Tables,
    // Only these categories are written back on commit.
    touched: HashSet<Category>,
    inserts: usize,
    fail_insert_after: Option<usize>,
}

impl LoadTransaction for MemoryTx {
    async fn delete_all(&mut self, category: Category) -> Result<u64> {
        self.touched.insert(category);
        let removed = self.staged.rows.insert(category, Vec::new());
        Ok(removed.map_or(0, |rows| rows.len() as u64))
    }

    async fn insert(&mut self, record: &Record) -> Result<()> {
        if self.fail_insert_after == Some(self.inserts) {
            bail!("injected insert failure");
        }
        self.inserts += 1;

        let category = record.category();
        self.touched.insert(category);
        let next = self.staged.next_id.entry(category).or_insert(1);
        let id = *next;
        *next += 1;
        self.staged.rows.entry(category).or_default().push(StoredRecord {
            id,
            record: record.clone(),
        });
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        let mut tables = self.target.lock().await;
        let mut staged = self.staged;
        for category in self.touched {
            let rows = staged.rows.remove(&category).unwrap_or_default();
            tables.rows.insert(category, rows);
            if let Some(next) = staged.next_id.remove(&category) {
                let current = tables.next_id.entry(category).or_insert(next);
                *current = (*current).max(next);
            }
        }
        Ok(())
    }
}

impl ReportStore for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx> {
        let staged = self.tables.lock().await.clone();
        Ok(MemoryTx {
            target: self.tables.clone(),
            staged,
            touched: HashSet::new(),
            inserts: 0,
            fail_insert_after: self.fail_insert_after,
        })
    }

    async fn fetch_page(&self, category: Category, page: &PageQuery) -> Result<Vec<StoredRecord>> {
        let tables = self.tables.lock().await;
        let Some(rows) = tables.rows.get(&category) else {
            return Ok(Vec::new());
        };
        let offset = usize::try_from(page.offset).unwrap_or(usize::MAX);
        let limit = usize::try_from(page.limit).unwrap_or(usize::MAX);
        Ok(rows
            .iter()
            .filter(|r| page.year.is_none() || r.record.year() == page.year)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }
}
