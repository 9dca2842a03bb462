//! Query service - paginated read-back of one report category

use anyhow::Result;
use serde::Serialize;

use crate::category::Category;
use crate::record::StoredRecord;
use crate::store::ReportStore;

pub const DEFAULT_PAGE_SIZE: i64 = 100;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("limit must be at least 1 (got {0})")]
    Limit(i64),
    #[error("offset must not be negative (got {0})")]
    Offset(i64),
    #[error("page must be at least 1 (got {0})")]
    Page(i64),
}

/// Exact-year filter plus offset/limit window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageQuery {
    pub year: Option<i32>,
    pub offset: i64,
    pub limit: i64,
}

impl Default for PageQuery {
    fn default() -> Self {
        Self {
            year: None,
            offset: 0,
            limit: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageQuery {
    pub fn new(year: Option<i32>, offset: i64, limit: i64) -> Result<Self, QueryError> {
        if limit < 1 {
            return Err(QueryError::Limit(limit));
        }
        if offset < 0 {
            return Err(QueryError::Offset(offset));
        }
        Ok(Self { year, offset, limit })
    }

    /// 1-based page number and page size, as the HTTP layer receives them.
    pub fn from_page(year: Option<i32>, page: i64, page_size: i64) -> Result<Self, QueryError> {
        if page < 1 {
            return Err(QueryError::Page(page));
        }
        if page_size < 1 {
            return Err(QueryError::Limit(page_size));
        }
        let offset = (page - 1).saturating_mul(page_size);
        Self::new(year, offset, page_size)
    }
}

pub async fn query<S: ReportStore>(
    store: &S,
    category: Category,
    page: &PageQuery,
) -> Result<Vec<StoredRecord>> {
    store.fetch_page(category, page).await
}
