use sea_orm::{ConnectOptions, Database, DatabaseConnection};

/// A fresh SQLite database in memory with the full schema.
pub async fn memory_db() -> DatabaseConnection {
    let mut opt = ConnectOptions::new("sqlite::memory:".to_owned());
    opt.max_connections(1).sqlx_logging(false);
    let db = Database::connect(opt).await.unwrap();
    super::ensure_schema(&db).await.unwrap();
    db
}
