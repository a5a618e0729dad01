use crate::db::*;
use tempfile::NamedTempFile;

#[tokio::test]
async fn test_database_creation() {
    let temp_file = NamedTempFile::new().unwrap();
    let db_path = temp_file.path();

    let db = Database::new(db_path).await.unwrap();

    // Verify tables exist
    let mut conn = db.pool.acquire().await.unwrap();

    let tables: Vec<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .fetch_all(&mut *conn)
            .await
            .unwrap();

    assert!(tables.contains(&"downloads".to_string()));
    assert!(tables.contains(&"dataset_usages".to_string()));
    assert!(tables.contains(&"admission_locks".to_string()));
    assert!(tables.contains(&"schema_version".to_string()));

    drop(conn);
    db.close().await;
}

#[tokio::test]
async fn test_reopening_does_not_reapply_migrations() {
    let temp_file = NamedTempFile::new().unwrap();

    let db = Database::new(temp_file.path()).await.unwrap();
    db.close().await;
    let db = Database::new(temp_file.path()).await.unwrap();

    let versions: Vec<i64> = sqlx::query_scalar("SELECT version FROM schema_version")
        .fetch_all(db.pool())
        .await
        .unwrap();
    assert_eq!(versions, vec![1]);

    db.close().await;
}

#[tokio::test]
async fn test_concurrent_open_of_fresh_database() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("shared.db");

    let (a, b) = tokio::join!(Database::new(&path), Database::new(&path));
    let a = a.unwrap();
    let b = b.unwrap();

    let versions: Vec<i64> = sqlx::query_scalar("SELECT version FROM schema_version")
        .fetch_all(b.pool())
        .await
        .unwrap();
    assert_eq!(versions, vec![1]);

    a.close().await;
    b.close().await;
}
