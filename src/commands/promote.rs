use anyhow::{Context, Result};
use chrono::Utc;
use tracing::info;

use super::subject_slug;
use crate::cli::PromoteArgs;
use crate::store::{promote_subject, snapshot_database};
use crate::util::{ensure_directory, utc_compact_string, write_json_pretty};

pub fn run(args: PromoteArgs) -> Result<()> {
    let started_ts = Utc::now();
    let config = args.store.load_config()?;
    let mut connection = args.store.open_database()?;
    let band = config.validation.band_for(&args.subject_key);
    let slug = subject_slug(&args.subject_key);

    if let Some(backup_dir) = &args.backup_dir {
        ensure_directory(backup_dir)?;
        let destination = backup_dir.join(format!(
            "topicforge_{}_{}.sqlite",
            slug,
            utc_compact_string(started_ts)
        ));
        snapshot_database(&connection, &destination)
            .with_context(|| format!("failed to snapshot into {}", destination.display()))?;
    }

    let outcome = promote_subject(&mut connection, &args.subject_key, band)
        .with_context(|| format!("promotion failed for {}", args.subject_key))?;

    let audit_path = args.store.manifest_dir().join(format!(
        "promotion_audit_{}_{}.json",
        slug,
        utc_compact_string(started_ts)
    ));
    write_json_pretty(&audit_path, &outcome)?;

    let version = outcome.ensure_promoted()?;
    info!(
        subject_key = %args.subject_key,
        version,
        nodes = outcome.report.node_count,
        repaired = outcome.report.repaired_count,
        audit = %audit_path.display(),
        "promotion complete"
    );
    Ok(())
}
