use anyhow::{Context, Result};
use tracing::info;

use crate::cli::CurateArgs;
use crate::store::mark_curated;

pub fn run(args: CurateArgs) -> Result<()> {
    let connection = args.store.open_database()?;
    let curated = !args.clear;

    mark_curated(
        &connection,
        &args.subject_key,
        &args.code,
        args.level,
        curated,
    )
    .with_context(|| format!("failed to update curation for {}", args.code))?;

    info!(
        subject_key = %args.subject_key,
        code = %args.code,
        level = args.level,
        curated,
        "curation flag set"
    );
    Ok(())
}
