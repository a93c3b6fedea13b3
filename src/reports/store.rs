// src/reports/store.rs - Data access seam for report queries
use async_trait::async_trait;
use sqlx::{MySql, Postgres};
use std::sync::Arc;

use super::query::BoundQuery;
use crate::coerce::RawRow;
use crate::db::Database;
use crate::error::{ApiError, ApiResult};

#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Runs one bound report query and decodes every row.
    async fn fetch_rows(&self, query: &BoundQuery) -> Result<Vec<RawRow>, sqlx::Error>;
}

/// Report queries against a live pool (the SIK hospital database).
pub struct SqlReportStore {
    db: Database,
}

impl SqlReportStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ReportStore for SqlReportStore {
    async fn fetch_rows(&self, query: &BoundQuery) -> Result<Vec<RawRow>, sqlx::Error> {
        let sql = self.db.sql(&query.sql);
        log::debug!("Running {} query with {} params", query.kind, query.params.len());

        match &self.db {
            Database::MySql(pool) => {
                let mut q = sqlx::query::<MySql>(&sql);
                for param in &query.params {
                    q = q.bind(*param);
                }
                let rows = q.fetch_all(pool).await?;
                Ok(rows.iter().map(RawRow::from_mysql).collect())
            }
            Database::Postgres(pool) => {
                let mut q = sqlx::query::<Postgres>(&sql);
                for param in &query.params {
                    q = q.bind(*param);
                }
                let rows = q.fetch_all(pool).await?;
                Ok(rows.iter().map(RawRow::from_postgres).collect())
            }
        }
    }
}

/// Shared handle given to report handlers. Empty when the reporting backend
/// could not be reached at startup.
#[derive(Clone)]
pub struct ReportBackend {
    store: Option<Arc<dyn ReportStore>>,
}

impl ReportBackend {
    pub fn new(store: Option<Arc<dyn ReportStore>>) -> Self {
        Self { store }
    }

    pub fn from_database(db: Option<&Database>) -> Self {
        Self::new(db.map(|db| Arc::new(SqlReportStore::new(db.clone())) as Arc<dyn ReportStore>))
    }

    pub fn store(&self) -> ApiResult<&dyn ReportStore> {
        self.store.as_deref().ok_or_else(|| {
            ApiError::BackendUnavailable("Koneksi ke database MySQL tidak tersedia".to_string())
        })
    }
}


#[cfg(test)]
mod tests {
    use super::memory::MemoryStore;
    use super::*;
    use crate::coerce::RawValue;
    use crate::reports::query::{self, QueryKind};
    use crate::reports::DateRange;
    use chrono::NaiveDate;

    #[test]
    fn test_unavailable_backend() {
        let backend = ReportBackend::new(None);
        assert!(matches!(backend.store(), Err(ApiError::BackendUnavailable(_))));
        assert!(ReportBackend::from_database(None).store().is_err());
    }

    #[actix_web::test]
    async fn test_memory_store_records_calls() {
        let store = MemoryStore::new()
            .with_rows(QueryKind::FreeSale, vec![RawRow::new().with("total", RawValue::Int(5))])
            .failing(QueryKind::Receiving, "table missing");
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        );

        let rows = store.fetch_rows(&query::free_sales(&range)).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(store.fetch_rows(&query::receiving(&range)).await.is_err());
        assert!(store.fetch_rows(&query::receivables(crate::reports::ReportKind::RawatInap, &range)).await.unwrap().is_empty());
        assert_eq!(store.calls().len(), 3);
    }
}
