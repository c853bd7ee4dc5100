//! Common re-exports for convenient entity usage.

pub use super::event::{
    ActiveModel as EventActiveModel, Column as EventColumn, Entity as Event, Model as EventModel,
};
pub use super::job_status::JobStatus;
pub use super::job_type::JobType;
pub use super::mirror_job::{
    ActiveModel as MirrorJobActiveModel, Column as MirrorJobColumn, Entity as MirrorJob,
    Model as MirrorJobModel,
};
pub use super::target_kind::{TargetKind, TargetRef};
