//! Event entity - durable, per-user progress notifications.
//!
//! Rows are appended by the event emitter and read back by pollers; they are
//! hints for observers, never a source of truth for job state. `id` is
//! assigned on insert and only grows, so pollers page on it.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "events")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub user_id: String,
    /// Logical stream name, e.g. `mirror-job`.
    pub channel: String,
    #[sea_orm(column_type = "Json")]
    pub payload: Json,
    #[sea_orm(default_value = false)]
    pub read: bool,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
