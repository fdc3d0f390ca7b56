use anyhow::Result;
use tracing::{info, warn};

use crate::cli::ValidateArgs;
use crate::error::EngineError;
use crate::store::validate_staging;

pub fn run(args: ValidateArgs) -> Result<()> {
    let config = args.store.load_config()?;
    let connection = args.store.open_database()?;
    let band = config.validation.band_for(&args.subject_key);

    let report = validate_staging(&connection, &args.subject_key, band)?;
    info!(
        subject_key = %report.subject_key,
        nodes = report.node_count,
        orphans = report.orphan_count,
        duplicates = report.duplicate_count,
        repaired = report.repaired_count,
        truncated = report.truncated_count,
        band_min = band.min,
        band_max = band.max,
        "validated staging"
    );

    if report.passed() {
        return Ok(());
    }
    for issue in &report.issues {
        warn!(subject_key = %report.subject_key, issue = %issue, "validation issue");
    }
    Err(EngineError::ValidationFailed {
        subject_key: report.subject_key,
        issues: report.issues,
    }
    .into())
}
