//! SeaORM entity definitions for the gitea-mirror database schema.

pub mod event;
pub mod job_status;
pub mod job_type;
pub mod mirror_job;
pub mod prelude;
pub mod target_kind;
