pub mod entities;
pub mod services;
#[cfg(test)]
pub(crate) mod testing;

use sea_orm::sea_query::Index;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, Schema};
use std::time::Duration;
use tracing::info;

use self::entities::{monitor_log, monitor_task, notification_channel, subscription};

pub async fn connect(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    let mut opt = ConnectOptions::new(database_url.to_owned());
    opt.max_connections(10)
        .connect_timeout(Duration::from_secs(10))
        .sqlx_logging(false);
    Database::connect(opt).await
}

/// Creates the tables the monitor needs when they do not exist yet.
///
/// Tasks are created before logs and subscriptions so the foreign keys
/// resolve on backends that check them at creation time.
pub async fn ensure_schema(db: &DatabaseConnection) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    let mut tables = vec![
        schema.create_table_from_entity(monitor_task::Entity),
        schema.create_table_from_entity(monitor_log::Entity),
        schema.create_table_from_entity(subscription::Entity),
        schema.create_table_from_entity(notification_channel::Entity),
    ];
    for table in tables.iter_mut() {
        table.if_not_exists();
        db.execute(backend.build(&*table)).await?;
    }

    let indexes = [
        Index::create()
            .name("idx_monitor_logs_task_time")
            .table(monitor_log::Entity)
            .col(monitor_log::Column::TaskId)
            .col(monitor_log::Column::CheckTime)
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_subscriptions_user_task")
            .table(subscription::Entity)
            .col(subscription::Column::UserId)
            .col(subscription::Column::TaskId)
            .unique()
            .if_not_exists()
            .to_owned(),
    ];
    for index in &indexes {
        db.execute(backend.build(index)).await?;
    }

    info!("Database schema is up to date.");
    Ok(())
}
