//! MirrorJob entity - durable record of one batch mirror/sync run.
//!
//! A job row is created before any item is processed and is the only place
//! progress survives a process restart. `item_ids` holds every item enrolled
//! in the batch; `completed_item_ids` the subset that finished successfully,
//! as of the last checkpoint.

use std::collections::HashSet;

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::entity::job_status::JobStatus;
use crate::entity::job_type::JobType;
use crate::entity::target_kind::{TargetKind, TargetRef};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "mirror_jobs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    // ─── Ownership ───────────────────────────────────────────────────────────
    /// User the job was started for.
    pub owner_id: String,
    pub job_type: JobType,
    /// Groups the jobs of one logical batch run.
    pub batch_id: Option<Uuid>,

    // ─── Target ──────────────────────────────────────────────────────────────
    pub target_kind: Option<TargetKind>,
    pub target_id: Option<String>,
    pub target_name: Option<String>,

    // ─── Lifecycle ───────────────────────────────────────────────────────────
    pub status: JobStatus,
    /// True while a live orchestrator owns this job.
    #[sea_orm(default_value = false)]
    pub in_progress: bool,
    #[sea_orm(column_type = "Text")]
    pub message: String,
    /// Structured failure detail (failed and skipped items).
    #[sea_orm(column_type = "Json", nullable)]
    pub details: Option<Json>,

    // ─── Progress ────────────────────────────────────────────────────────────
    pub total_items: i32,
    pub completed_items: i32,
    /// Every item id enrolled in the batch (JSON array of strings).
    #[sea_orm(column_type = "Json")]
    pub item_ids: Json,
    /// Item ids that finished successfully as of `last_checkpoint`.
    #[sea_orm(column_type = "Json")]
    pub completed_item_ids: Json,

    // ─── Timestamps ──────────────────────────────────────────────────────────
    pub created_at: DateTimeWithTimeZone,
    pub started_at: Option<DateTimeWithTimeZone>,
    pub completed_at: Option<DateTimeWithTimeZone>,
    pub last_checkpoint: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Read a JSON array of strings, ignoring anything that is not a string.
pub(crate) fn json_string_list(value: &Json) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_owned))
                .collect()
        })
        .unwrap_or_default()
}

impl Model {
    pub fn item_ids(&self) -> Vec<String> {
        json_string_list(&self.item_ids)
    }

    pub fn completed_item_ids(&self) -> Vec<String> {
        json_string_list(&self.completed_item_ids)
    }

    /// Enrolled items not yet recorded as completed, in enrollment order.
    pub fn remaining_item_ids(&self) -> Vec<String> {
        let done: HashSet<String> = self.completed_item_ids().into_iter().collect();
        self.item_ids()
            .into_iter()
            .filter(|id| !done.contains(id))
            .collect()
    }

    pub fn target(&self) -> Option<TargetRef> {
        TargetRef::from_columns(
            self.target_kind,
            self.target_id.as_deref(),
            self.target_name.as_deref(),
        )
    }

    /// Completion percentage in `0..=100`. An empty job counts as complete.
    pub fn progress_percent(&self) -> u8 {
        if self.total_items <= 0 {
            return 100;
        }
        let pct = i64::from(self.completed_items) * 100 / i64::from(self.total_items);
        pct.clamp(0, 100) as u8
    }

    /// A job whose record says a live run owns it.
    pub fn is_running(&self) -> bool {
        self.in_progress && self.status == JobStatus::InProgress
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn job(items: Json, completed: Json) -> Model {
        let total = json_string_list(&items).len() as i32;
        let done = json_string_list(&completed).len() as i32;
        Model {
            id: Uuid::new_v4(),
            owner_id: "user-1".to_string(),
            job_type: JobType::Mirror,
            batch_id: None,
            target_kind: None,
            target_id: None,
            target_name: None,
            status: JobStatus::InProgress,
            in_progress: true,
            message: String::new(),
            details: None,
            total_items: total,
            completed_items: done,
            item_ids: items,
            completed_item_ids: completed,
            created_at: Utc::now().fixed_offset(),
            started_at: None,
            completed_at: None,
            last_checkpoint: None,
        }
    }

    #[test]
    fn remaining_preserves_enrollment_order() {
        let model = job(json!(["a", "b", "c", "d"]), json!(["c", "a"]));
        assert_eq!(model.remaining_item_ids(), vec!["b", "d"]);
    }

    #[test]
    fn malformed_json_reads_as_empty() {
        let model = job(json!({"not": "a list"}), json!([1, "x", null]));
        assert!(model.item_ids().is_empty());
        assert_eq!(model.completed_item_ids(), vec!["x"]);
    }

    #[test]
    fn progress_percent_bounds() {
        assert_eq!(job(json!([]), json!([])).progress_percent(), 100);
        assert_eq!(job(json!(["a", "b", "c", "d"]), json!(["a"])).progress_percent(), 25);
        assert_eq!(job(json!(["a"]), json!(["a"])).progress_percent(), 100);
    }

    #[test]
    fn target_reads_back_from_columns() {
        let mut model = job(json!([]), json!([]));
        assert_eq!(model.target(), None);
        model.target_kind = Some(TargetKind::Organization);
        model.target_id = Some("9".to_string());
        model.target_name = Some("gitea".to_string());
        assert_eq!(model.target(), Some(TargetRef::organization("9", "gitea")));
    }
}
