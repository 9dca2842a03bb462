use tracing::{info, warn};

use crate::category::Category;
use crate::error::PipelineError;
use crate::record::Record;
use crate::store::{LoadTransaction, ReportStore};

fn persistence_failure(category: Category, record: Option<&Record>, err: anyhow::Error) -> PipelineError {
    PipelineError::PersistenceFailure {
        table: category.table(),
        record: record.map(Record::describe).unwrap_or_else(|| "-".to_string()),
        detail: format!("{:#}", err),
    }
}

/// Replaces the whole table of `category` with `records` in one transaction.
///
/// Returns the number of inserted rows. On any failure the transaction is
/// dropped without commit, so the previous table content survives.
pub async fn load<S: ReportStore>(
    store: &S,
    category: Category,
    records: &[Record],
) -> Result<usize, PipelineError> {
    if let Some(stray) = records.iter().find(|r| r.category() != category) {
        return Err(PipelineError::PersistenceFailure {
            table: category.table(),
            record: stray.describe(),
            detail: format!("record belongs to '{}'", stray.category()),
        });
    }

    let mut tx = store
        .begin()
        .await
        .map_err(|e| persistence_failure(category, None, e))?;

    let deleted = tx
        .delete_all(category)
        .await
        .map_err(|e| persistence_failure(category, None, e))?;

    for record in records {
        if let Err(e) = tx.insert(record).await {
            warn!(%category, record = %record.describe(), error = %e, "insert failed, rolling back");
            return Err(persistence_failure(category, Some(record), e));
        }
    }

    tx.commit()
        .await
        .map_err(|e| persistence_failure(category, None, e))?;

    info!(%category, deleted, inserted = records.len(), "table replaced");
    Ok(records.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::query::PageQuery;
    use crate::record::{ProductRecord, SalesRecord};
    use crate::store::ReportStore;
    use crate::taxonomy::WineDerivative;

    fn products(names: &[&str]) -> Vec<Record> {
        names
            .iter()
            .map(|name| {
                Record::Product(ProductRecord {
                    name: name.to_string(),
                    wine_derivative_name: "VINHO DE MESA".to_string(),
                    quantity: 10,
                    year_no: Some(2023),
                })
            })
            .collect()
    }

    async fn all(store: &MemoryStore, category: Category) -> Vec<Record> {
        store
            .fetch_page(category, &PageQuery::new(None, 0, 1_000).unwrap())
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.record)
            .collect()
    }

    #[tokio::test]
    async fn test_load_replaces_previous_rows() {
        let store = MemoryStore::new();
        load(&store, Category::Product, &products(&["a", "b", "c"])).await.unwrap();
        let inserted = load(&store, Category::Product, &products(&["d"])).await.unwrap();
        assert_eq!(inserted, 1);
        assert_eq!(all(&store, Category::Product).await, products(&["d"]));
    }

    #[tokio::test]
    async fn test_failed_insert_keeps_previous_table() {
        let store = MemoryStore::new();
        load(&store, Category::Product, &products(&["old"])).await.unwrap();

        let failing = store.clone().fail_insert_after(1);
        let err = load(&failing, Category::Product, &products(&["x", "y", "z"]))
            .await
            .unwrap_err();
        match err {
            PipelineError::PersistenceFailure { table, record, .. } => {
                assert_eq!(table, "product");
                assert!(record.contains("\"y\""));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(all(&store, Category::Product).await, products(&["old"]));
    }

    #[tokio::test]
    async fn test_load_leaves_other_categories_alone() {
        let store = MemoryStore::new();
        let sales = vec![Record::Sales(SalesRecord {
            name: "Tinto".to_string(),
            wine_derivative_name: WineDerivative::TableWine,
            quantity_liters: 5,
            year_no: Some(2020),
        })];
        load(&store, Category::Sales, &sales).await.unwrap();
        load(&store, Category::Product, &products(&["a"])).await.unwrap();
        load(&store, Category::Product, &[]).await.unwrap();

        assert_eq!(all(&store, Category::Sales).await, sales);
        assert!(all(&store, Category::Product).await.is_empty());
    }

    #[tokio::test]
    async fn test_records_of_another_category_rejected() {
        let store = MemoryStore::new();
        let err = load(&store, Category::Sales, &products(&["a"])).await.unwrap_err();
        assert!(matches!(err, PipelineError::PersistenceFailure { table: "sales", .. }));
    }
}
