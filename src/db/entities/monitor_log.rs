use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[sea_orm(table_name = "monitor_logs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub task_id: i32,
    #[sea_orm(column_type = "Text", nullable)]
    pub old_content: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub new_content: Option<String>,
    pub is_changed: bool,
    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,
    pub check_time: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::monitor_task::Entity",
        from = "Column::TaskId",
        to = "super::monitor_task::Column::Id",
        on_delete = "Cascade",
        on_update = "Cascade"
    )]
    MonitorTask,
}

impl Related<super::monitor_task::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MonitorTask.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
