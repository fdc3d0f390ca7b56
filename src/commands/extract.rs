use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::info;

use super::{SubjectJob, process_subject};
use crate::cli::ExtractArgs;
use crate::extract::ExtractionEngine;
use crate::model::subject_key_from_parts;
use crate::store::SubjectLocks;
use crate::util::new_run_id;

pub fn run(args: ExtractArgs) -> Result<()> {
    let subject_key = subject_key_from_parts(&args.board, &args.qualification, &args.subject);
    if subject_key.is_empty() {
        bail!("subject key is empty; pass --board, --qualification and --subject");
    }

    let config = args.store.load_config()?;
    let engine = ExtractionEngine::new(config).context("failed to compile line markers")?;
    let mut connection = args.store.open_database()?;
    let locks = SubjectLocks::new();
    let run_id = args.run_id.clone().unwrap_or_else(new_run_id);

    info!(
        subject_key = %subject_key,
        run_id = %run_id,
        source = %args.source.display(),
        "starting extraction"
    );

    let run = process_subject(
        &mut connection,
        &engine,
        &locks,
        Duration::ZERO,
        &args.store.manifest_dir(),
        &SubjectJob {
            subject_key: &subject_key,
            source_path: &args.source,
            forced: args.pattern.map(|pattern| pattern.layout()),
            run_id: &run_id,
        },
    )
    .with_context(|| format!("extraction failed for {subject_key}"))?;

    info!(
        subject_key = %subject_key,
        status = run.status.as_str(),
        nodes = run.node_count,
        manifest = %run.manifest_path.display(),
        "extraction complete"
    );
    Ok(())
}
