use anyhow::{Context, Result};
use chrono::Utc;
use tracing::info;

use super::subject_slug;
use crate::cli::RollbackArgs;
use crate::store::rollback_subject;
use crate::util::{utc_compact_string, write_json_pretty};

pub fn run(args: RollbackArgs) -> Result<()> {
    let started_ts = Utc::now();
    let mut connection = args.store.open_database()?;

    let outcome = rollback_subject(&mut connection, &args.subject_key, args.to_version)
        .with_context(|| format!("rollback failed for {}", args.subject_key))?;

    let audit_path = args.store.manifest_dir().join(format!(
        "rollback_audit_{}_{}.json",
        subject_slug(&args.subject_key),
        utc_compact_string(started_ts)
    ));
    write_json_pretty(&audit_path, &outcome)?;

    info!(
        subject_key = %outcome.subject_key,
        from_version = ?outcome.from_version,
        to_version = outcome.to_version,
        audit = %audit_path.display(),
        "rollback complete"
    );
    Ok(())
}
