//! Isolated execution of selected entries.

mod executor;
mod job;

pub use self::executor::{fallback_html, Enrichment, JobExecutor, ProcessReport};
pub use self::job::{materialize_jobs, Job, ScratchDir};
