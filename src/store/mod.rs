mod db_setup;
mod locks;
mod promote;
mod reconcile;
mod runs;
mod validate;


pub use db_setup::open_database;
pub use locks::SubjectLocks;
pub use promote::{load_production, promote_subject, rollback_subject, snapshot_database};
pub use reconcile::{ReconcileReport, load_staging, mark_curated, reconcile_subject};
pub use runs::{
    ExtractionRunRecord, SubjectSummary, list_subject_summaries, load_batch_statuses,
    load_promotion_audits, record_batch_progress, record_extraction_run,
};
pub use validate::validate_staging;
