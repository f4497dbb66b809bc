use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[sea_orm(table_name = "monitor_tasks")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub owner_id: i32,
    pub name: String,
    pub url: String,
    pub selector: String, // CSS selector locating the watched element
    pub interval_seconds: i32,
    pub is_active: bool,
    pub is_public: bool,
    #[sea_orm(nullable)]
    pub notification_channel_id: Option<i32>,
    #[sea_orm(column_type = "Text", nullable)]
    pub last_content: Option<String>,
    #[sea_orm(nullable)]
    pub last_check: Option<ChronoDateTimeUtc>,
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::monitor_log::Entity")]
    MonitorLog,

    #[sea_orm(has_many = "super::subscription::Entity")]
    Subscription,
}

impl Related<super::monitor_log::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MonitorLog.def()
    }
}

impl Related<super::subscription::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Subscription.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// The check period of this task as a tokio-friendly duration.
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_seconds.max(1) as u64)
    }
}
