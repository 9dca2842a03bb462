//! Storage seam for the loader and the query service
//!
//! [`PgStore`] is the real backend. `memory::MemoryStore` implements the same
//! traits for dry runs and tests.

use anyhow::{Context, Result};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::future::Future;

use crate::category::Category;
use crate::query::PageQuery;
use crate::record::{ProcessRecord, ProductRecord, Record, SalesRecord, StoredRecord, TradeRecord};
use crate::taxonomy::{GrapeType, ProcessColor, ProcessKind, WineDerivative};

/// One category's replace-all transaction. Dropping it without `commit`
/// rolls everything back.
pub trait LoadTransaction: Send {
    fn delete_all(&mut self, category: Category) -> impl Future<Output = Result<u64>> + Send;
    fn insert(&mut self, record: &Record) -> impl Future<Output = Result<()>> + Send;
    fn commit(self) -> impl Future<Output = Result<()>> + Send;
}

pub trait ReportStore: Send + Sync {
    type Tx: LoadTransaction;

    fn begin(&self) -> impl Future<Output = Result<Self::Tx>> + Send;

    /// Rows of one category in primary-key order, filtered and paginated.
    fn fetch_page(
        &self,
        category: Category,
        page: &PageQuery,
    ) -> impl Future<Output = Result<Vec<StoredRecord>>> + Send;
}

// =============================================================================
// POSTGRES
// =============================================================================

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(db_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(db_url)
            .await
            .context("Failed to connect to database")?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

pub struct PgLoadTx {
    tx: Transaction<'static, Postgres>,
}

impl LoadTransaction for PgLoadTx {
    async fn delete_all(&mut self, category: Category) -> Result<u64> {
        let result = sqlx::query(&format!(r#"DELETE FROM "{}""#, category.table()))
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert(&mut self, record: &Record) -> Result<()> {
        match record {
            Record::Product(r) => {
                sqlx::query(
                    r#"
                    INSERT INTO "product" (name, wine_derivative_name, quantity, year_no)
                    VALUES ($1, $2, $3, $4)
                    "#,
                )
                .bind(&r.name)
                .bind(&r.wine_derivative_name)
                .bind(r.quantity)
                .bind(r.year_no)
                .execute(&mut *self.tx)
                .await?;
            }
            Record::Process(r) => {
                sqlx::query(
                    r#"
                    INSERT INTO "process" (color_name, kind_name, cultivar, quantity_kg, year_no)
                    VALUES ($1, $2, $3, $4, $5)
                    "#,
                )
                .bind(r.color_name.as_str())
                .bind(r.kind_name.as_str())
                .bind(&r.cultivar)
                .bind(r.quantity_kg)
                .bind(r.year_no)
                .execute(&mut *self.tx)
                .await?;
            }
            Record::Sales(r) => {
                sqlx::query(
                    r#"
                    INSERT INTO "sales" (name, wine_derivative_name, quantity_liters, year_no)
                    VALUES ($1, $2, $3, $4)
                    "#,
                )
                .bind(&r.name)
                .bind(r.wine_derivative_name.as_str())
                .bind(r.quantity_liters)
                .bind(r.year_no)
                .execute(&mut *self.tx)
                .await?;
            }
            Record::Import(r) | Record::Export(r) => {
                let sql = format!(
                    r#"
                    INSERT INTO "{}" (grape_type_name, country, quantity_kg, value_usd, year_no)
                    VALUES ($1, $2, $3, $4, $5)
                    "#,
                    record.category().table()
                );
                sqlx::query(&sql)
                    .bind(r.grape_type_name.as_str())
                    .bind(&r.country)
                    .bind(r.quantity_kg)
                    .bind(r.value_usd)
                    .bind(r.year_no)
                    .execute(&mut *self.tx)
                    .await?;
            }
        }
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

fn select_sql(category: Category) -> String {
    let columns = match category {
        Category::Product => "id, name, wine_derivative_name, quantity, year_no",
        Category::Process => "id, color_name, kind_name, cultivar, quantity_kg, year_no",
        Category::Sales => "id, name, wine_derivative_name, quantity_liters, year_no",
        Category::Import | Category::Export => {
            "id, grape_type_name, country, quantity_kg, value_usd, year_no"
        }
    };
    format!(
        r#"
        SELECT {columns}
        FROM "{table}"
        WHERE ($1::INT IS NULL OR year_no = $1)
        ORDER BY id ASC
        LIMIT $2 OFFSET $3
        "#,
        columns = columns,
        table = category.table()
    )
}

fn stored_label<T>(row: &PgRow, column: &str, parse: fn(&str) -> Option<T>) -> Result<T> {
    let raw: String = row.try_get(column)?;
    parse(&raw).with_context(|| format!("unknown {} '{}' stored in database", column, raw))
}

fn map_row(category: Category, row: &PgRow) -> Result<StoredRecord> {
    let id: i64 = row.try_get("id")?;
    let year_no: Option<i32> = row.try_get("year_no")?;
    let record = match category {
        Category::Product => Record::Product(ProductRecord {
            name: row.try_get("name")?,
            wine_derivative_name: row.try_get("wine_derivative_name")?,
            quantity: row.try_get("quantity")?,
            year_no,
        }),
        Category::Process => Record::Process(ProcessRecord {
            color_name: stored_label(row, "color_name", ProcessColor::parse)?,
            kind_name: stored_label(row, "kind_name", ProcessKind::parse)?,
            cultivar: row.try_get("cultivar")?,
            quantity_kg: row.try_get("quantity_kg")?,
            year_no,
        }),
        Category::Sales => Record::Sales(SalesRecord {
            name: row.try_get("name")?,
            wine_derivative_name: stored_label(row, "wine_derivative_name", WineDerivative::parse)?,
            quantity_liters: row.try_get("quantity_liters")?,
            year_no,
        }),
        Category::Import | Category::Export => {
            let trade = TradeRecord {
                grape_type_name: stored_label(row, "grape_type_name", GrapeType::parse)?,
                country: row.try_get("country")?,
                quantity_kg: row.try_get("quantity_kg")?,
                value_usd: row.try_get("value_usd")?,
                year_no,
            };
            if category == Category::Import {
                Record::Import(trade)
            } else {
                Record::Export(trade)
            }
        }
    };
    Ok(StoredRecord { id, record })
}

impl ReportStore for PgStore {
    type Tx = PgLoadTx;

    async fn begin(&self) -> Result<PgLoadTx> {
        let tx = self.pool.begin().await.context("Failed to open transaction")?;
        Ok(PgLoadTx { tx })
    }

    async fn fetch_page(&self, category: Category, page: &PageQuery) -> Result<Vec<StoredRecord>> {
        let rows = sqlx::query(&select_sql(category))
            .bind(page.year)
            .bind(page.limit)
            .bind(page.offset)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("Failed to query {}", category.table()))?;

        rows.iter().map(|row| map_row(category, row)).collect()
    }
}
