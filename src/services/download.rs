use crate::entities::{prelude::*, *};
use crate::services::entitlement::{has_completed_purchase, GrantReason};
use crate::services::storage::{legacy_key, StorageError, StorageService};
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum DownloadError {
    /// No file row for the design, or the object is gone under both the
    /// current and the legacy key.
    #[error("file not found for design {0}")]
    FileNotFound(String),

    /// Retrieval failed for a reason other than absence. Retryable.
    #[error("storage retrieval failed: {0}")]
    Storage(#[source] anyhow::Error),
}

#[derive(Debug)]
pub struct DownloadedFile {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub file_path: String,
}

/// Executes a download that the resolver already granted: picks the file,
/// pulls the bytes (with the legacy-path compatibility shim), then records
/// counter/history side effects strictly after the successful retrieval.
pub struct DownloadService {
    db: DatabaseConnection,
    storage: Arc<dyn StorageService>,
    default_currency: String,
}

impl DownloadService {
    pub fn new(
        db: DatabaseConnection,
        storage: Arc<dyn StorageService>,
        default_currency: String,
    ) -> Self {
        Self {
            db,
            storage,
            default_currency,
        }
    }

    pub async fn execute(
        &self,
        design_id: &str,
        requested_path: Option<&str>,
        user_id: Option<&str>,
        reason: GrantReason,
    ) -> Result<DownloadedFile, DownloadError> {
        let file = self.select_file(design_id, requested_path).await?;

        let bytes = self.retrieve_with_fallback(&file.file_path).await?;

        // Side effects only after the bytes are in hand. Failures here are
        // operator-visible but never turn into a user-facing download error.
        self.record_side_effects(design_id, &file.file_path, user_id, reason)
            .await;

        Ok(DownloadedFile {
            bytes,
            file_name: file.file_name,
            file_path: file.file_path,
        })
    }

    /// Explicit path if the caller named one, otherwise the file with the
    /// lowest display order.
    async fn select_file(
        &self,
        design_id: &str,
        requested_path: Option<&str>,
    ) -> Result<design_files::Model, DownloadError> {
        let mut query = DesignFiles::find().filter(design_files::Column::DesignId.eq(design_id));

        if let Some(path) = requested_path {
            query = query.filter(design_files::Column::FilePath.eq(path));
        }

        query
            .order_by_asc(design_files::Column::DisplayOrder)
            .one(&self.db)
            .await
            .map_err(|e| DownloadError::Storage(anyhow::anyhow!(e)))?
            .ok_or_else(|| DownloadError::FileNotFound(design_id.to_string()))
    }

    /// Best-effort shim for objects stored under the pre-migration naming
    /// scheme: one retry with the bare file name before giving up.
    async fn retrieve_with_fallback(&self, file_path: &str) -> Result<Vec<u8>, DownloadError> {
        match self.storage.retrieve(file_path).await {
            Ok(bytes) => Ok(bytes),
            Err(StorageError::NotFound(_)) => {
                let Some(legacy) = legacy_key(file_path) else {
                    return Err(DownloadError::FileNotFound(file_path.to_string()));
                };
                tracing::debug!("Object missing at {}, trying legacy key {}", file_path, legacy);
                match self.storage.retrieve(&legacy).await {
                    Ok(bytes) => Ok(bytes),
                    Err(StorageError::NotFound(_)) => {
                        Err(DownloadError::FileNotFound(file_path.to_string()))
                    }
                    Err(StorageError::Backend(e)) => Err(DownloadError::Storage(e)),
                }
            }
            Err(StorageError::Backend(e)) => Err(DownloadError::Storage(e)),
        }
    }

    async fn record_side_effects(
        &self,
        design_id: &str,
        file_path: &str,
        user_id: Option<&str>,
        reason: GrantReason,
    ) {
        // Atomic SQL increment; concurrent downloads may interleave and the
        // count is allowed to be approximate.
        let increment = Designs::update_many()
            .col_expr(
                designs::Column::Downloads,
                Expr::col(designs::Column::Downloads).add(1),
            )
            .filter(designs::Column::Id.eq(design_id))
            .exec(&self.db)
            .await;

        if let Err(e) = increment {
            tracing::error!(
                target: "bookkeeping",
                design_id = %design_id,
                "Failed to increment download counter: {}",
                e
            );
        }

        let event = download_events::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            user_id: Set(user_id.map(|u| u.to_string())),
            design_id: Set(design_id.to_string()),
            file_path: Set(file_path.to_string()),
            created_at: Set(Utc::now()),
        };

        if let Err(e) = event.insert(&self.db).await {
            tracing::error!(
                target: "bookkeeping",
                design_id = %design_id,
                "Failed to record download event: {}",
                e
            );
        }

        // Free downloads by an authenticated user leave a permanent
        // zero-amount grant so the ledger stays complete. Check-then-insert;
        // a raced duplicate is harmless.
        if reason == GrantReason::Free {
            if let Some(user_id) = user_id {
                if let Err(e) = self.ensure_free_grant(user_id, design_id).await {
                    tracing::error!(
                        target: "bookkeeping",
                        design_id = %design_id,
                        user_id = %user_id,
                        "Failed to record free-download grant: {}",
                        e
                    );
                }
            }
        }
    }

    async fn ensure_free_grant(&self, user_id: &str, design_id: &str) -> anyhow::Result<()> {
        if has_completed_purchase(&self.db, user_id, design_id).await? {
            return Ok(());
        }

        let currency = Designs::find_by_id(design_id)
            .one(&self.db)
            .await?
            .map(|d| d.currency)
            .unwrap_or_else(|| self.default_currency.clone());

        purchases::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            user_id: Set(user_id.to_string()),
            design_id: Set(design_id.to_string()),
            amount_cents: Set(0),
            currency: Set(currency),
            status: Set(purchases::STATUS_COMPLETED.to_string()),
            session_id: Set(None),
            created_at: Set(Utc::now()),
        }
        .insert(&self.db)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database::run_migrations;
    use async_trait::async_trait;
    use sea_orm::Database;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct MockStorage {
        objects: Mutex<HashMap<String, Vec<u8>>>,
        fail_backend: bool,
    }

    impl MockStorage {
        fn new() -> Self {
            Self {
                objects: Mutex::new(HashMap::new()),
                fail_backend: false,
            }
        }

        fn failing() -> Self {
            Self {
                objects: Mutex::new(HashMap::new()),
                fail_backend: true,
            }
        }

        fn put(&self, key: &str, data: &[u8]) {
            self.objects
                .lock()
                .unwrap()
                .insert(key.to_string(), data.to_vec());
        }
    }

    #[async_trait]
    impl StorageService for MockStorage {
        async fn retrieve(&self, key: &str) -> Result<Vec<u8>, StorageError> {
            if self.fail_backend {
                return Err(StorageError::Backend(anyhow::anyhow!("simulated outage")));
            }
            self.objects
                .lock()
                .unwrap()
                .get(key)
                .cloned()
                .ok_or_else(|| StorageError::NotFound(key.to_string()))
        }

        async fn store(&self, key: &str, data: Vec<u8>) -> Result<(), StorageError> {
            self.put(key, &data);
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<(), StorageError> {
            self.objects.lock().unwrap().remove(key);
            Ok(())
        }

        async fn exists(&self, key: &str) -> Result<bool, StorageError> {
            Ok(self.objects.lock().unwrap().contains_key(key))
        }

        fn public_url(&self, key: &str) -> String {
            format!("/mock/{}", key)
        }
    }

    async fn setup_db() -> DatabaseConnection {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        run_migrations(&db).await.unwrap();
        for id in ["seller", "buyer", "u1"] {
            users::ActiveModel {
                id: Set(id.to_string()),
                username: Set(id.to_string()),
                password_hash: Set("x".to_string()),
                created_at: Set(Utc::now()),
            }
            .insert(&db)
            .await
            .unwrap();
        }
        db
    }

    async fn insert_design(db: &DatabaseConnection, id: &str, owner: &str) {
        designs::ActiveModel {
            id: Set(id.to_string()),
            user_id: Set(owner.to_string()),
            title: Set("Icon Pack".to_string()),
            description: Set(None),
            price_cents: Set(None),
            currency: Set("USD".to_string()),
            free_download: Set(true),
            downloads: Set(0),
            file_path: Set(None),
            created_at: Set(Utc::now()),
        }
        .insert(db)
        .await
        .unwrap();
    }

    async fn insert_file(db: &DatabaseConnection, design_id: &str, path: &str, order: i32) {
        design_files::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            design_id: Set(design_id.to_string()),
            file_path: Set(path.to_string()),
            file_name: Set(path.rsplit('/').next().unwrap().to_string()),
            display_order: Set(order),
            created_at: Set(Utc::now()),
        }
        .insert(db)
        .await
        .unwrap();
    }

    async fn downloads_of(db: &DatabaseConnection, id: &str) -> i32 {
        Designs::find_by_id(id).one(db).await.unwrap().unwrap().downloads
    }

    #[tokio::test]
    async fn picks_lowest_display_order() {
        let db = setup_db().await;
        insert_design(&db, "d1", "seller").await;
        insert_file(&db, "d1", "designs/d1/second.zip", 2).await;
        insert_file(&db, "d1", "designs/d1/first.zip", 1).await;

        let storage = Arc::new(MockStorage::new());
        storage.put("designs/d1/first.zip", b"first");
        storage.put("designs/d1/second.zip", b"second");

        let svc = DownloadService::new(db, storage, "USD".to_string());
        let out = svc
            .execute("d1", None, None, GrantReason::Free)
            .await
            .unwrap();

        assert_eq!(out.bytes, b"first");
        assert_eq!(out.file_name, "first.zip");
    }

    #[tokio::test]
    async fn explicit_path_overrides_order() {
        let db = setup_db().await;
        insert_design(&db, "d1", "seller").await;
        insert_file(&db, "d1", "designs/d1/first.zip", 1).await;
        insert_file(&db, "d1", "designs/d1/second.zip", 2).await;

        let storage = Arc::new(MockStorage::new());
        storage.put("designs/d1/second.zip", b"second");

        let svc = DownloadService::new(db, storage, "USD".to_string());
        let out = svc
            .execute("d1", Some("designs/d1/second.zip"), None, GrantReason::Free)
            .await
            .unwrap();

        assert_eq!(out.bytes, b"second");
    }

    #[tokio::test]
    async fn legacy_key_fallback() {
        let db = setup_db().await;
        insert_design(&db, "d1", "seller").await;
        insert_file(&db, "d1", "designs/d1/pack.zip", 1).await;

        // Object only exists under the old bare-name layout.
        let storage = Arc::new(MockStorage::new());
        storage.put("pack.zip", b"legacy bytes");

        let svc = DownloadService::new(db, storage, "USD".to_string());
        let out = svc
            .execute("d1", None, None, GrantReason::Free)
            .await
            .unwrap();

        assert_eq!(out.bytes, b"legacy bytes");
    }

    #[tokio::test]
    async fn no_file_row_is_not_found_and_no_side_effects() {
        let db = setup_db().await;
        insert_design(&db, "d1", "seller").await;

        let svc = DownloadService::new(db.clone(), Arc::new(MockStorage::new()), "USD".to_string());
        let err = svc
            .execute("d1", None, Some("u1"), GrantReason::Free)
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::FileNotFound(_)));
        assert_eq!(downloads_of(&db, "d1").await, 0);
        assert_eq!(DownloadEvents::find().all(&db).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn missing_object_leaves_counter_unchanged() {
        let db = setup_db().await;
        insert_design(&db, "d1", "seller").await;
        insert_file(&db, "d1", "designs/d1/pack.zip", 1).await;

        let svc = DownloadService::new(db.clone(), Arc::new(MockStorage::new()), "USD".to_string());
        let err = svc
            .execute("d1", None, None, GrantReason::Free)
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::FileNotFound(_)));
        assert_eq!(downloads_of(&db, "d1").await, 0);
    }

    #[tokio::test]
    async fn backend_fault_is_storage_error_not_found_counter_unchanged() {
        let db = setup_db().await;
        insert_design(&db, "d1", "seller").await;
        insert_file(&db, "d1", "designs/d1/pack.zip", 1).await;

        let svc = DownloadService::new(db.clone(), Arc::new(MockStorage::failing()), "USD".to_string());
        let err = svc
            .execute("d1", None, None, GrantReason::Free)
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::Storage(_)));
        assert_eq!(downloads_of(&db, "d1").await, 0);
    }

    #[tokio::test]
    async fn free_authenticated_download_records_grant_once() {
        let db = setup_db().await;
        insert_design(&db, "d1", "seller").await;
        insert_file(&db, "d1", "designs/d1/pack.zip", 1).await;

        let storage = Arc::new(MockStorage::new());
        storage.put("designs/d1/pack.zip", b"bytes");

        let svc = DownloadService::new(db.clone(), storage, "USD".to_string());
        svc.execute("d1", None, Some("u1"), GrantReason::Free)
            .await
            .unwrap();
        svc.execute("d1", None, Some("u1"), GrantReason::Free)
            .await
            .unwrap();

        assert_eq!(downloads_of(&db, "d1").await, 2);
        assert_eq!(DownloadEvents::find().all(&db).await.unwrap().len(), 2);

        // Second pass hits the pre-check, no duplicate grant.
        let grants = Purchases::find().all(&db).await.unwrap();
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].amount_cents, 0);
        assert_eq!(grants[0].status, purchases::STATUS_COMPLETED);
        assert_eq!(grants[0].user_id, "u1");
    }

    #[tokio::test]
    async fn anonymous_free_download_records_event_without_grant() {
        let db = setup_db().await;
        insert_design(&db, "d1", "seller").await;
        insert_file(&db, "d1", "designs/d1/pack.zip", 1).await;

        let storage = Arc::new(MockStorage::new());
        storage.put("designs/d1/pack.zip", b"bytes");

        let svc = DownloadService::new(db.clone(), storage, "USD".to_string());
        svc.execute("d1", None, None, GrantReason::Free)
            .await
            .unwrap();

        assert_eq!(downloads_of(&db, "d1").await, 1);
        let events = DownloadEvents::find().all(&db).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].user_id, None);
        assert_eq!(Purchases::find().all(&db).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn bookkeeping_failure_still_serves_bytes() {
        use sea_orm::{ConnectionTrait, Statement};

        let db = setup_db().await;
        insert_design(&db, "d1", "seller").await;
        insert_file(&db, "d1", "designs/d1/pack.zip", 1).await;

        let storage = Arc::new(MockStorage::new());
        storage.put("designs/d1/pack.zip", b"bytes");

        // Break every bookkeeping write; the transfer must not care.
        for table in ["download_events", "purchases"] {
            db.execute(Statement::from_string(
                db.get_database_backend(),
                format!("DROP TABLE {}", table),
            ))
            .await
            .unwrap();
        }

        let svc = DownloadService::new(db.clone(), storage, "USD".to_string());
        let out = svc
            .execute("d1", None, Some("u1"), GrantReason::Free)
            .await
            .unwrap();

        assert_eq!(out.bytes, b"bytes");
        // Counter write still works and is independent of the failed rows.
        assert_eq!(downloads_of(&db, "d1").await, 1);
    }

    #[tokio::test]
    async fn purchased_download_does_not_add_grant() {
        let db = setup_db().await;
        insert_design(&db, "d1", "seller").await;
        insert_file(&db, "d1", "designs/d1/pack.zip", 1).await;

        let storage = Arc::new(MockStorage::new());
        storage.put("designs/d1/pack.zip", b"bytes");

        let svc = DownloadService::new(db.clone(), storage, "USD".to_string());
        svc.execute("d1", None, Some("buyer"), GrantReason::Purchased)
            .await
            .unwrap();

        assert_eq!(Purchases::find().all(&db).await.unwrap().len(), 0);
        assert_eq!(downloads_of(&db, "d1").await, 1);
    }
}
