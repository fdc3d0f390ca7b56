pub mod batch;
pub mod curate;
pub mod extract;
pub mod promote;
pub mod rollback;
pub mod status;
pub mod validate;

#[cfg(test)]
mod tests;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::{info, warn};

use crate::extract::{ExtractionEngine, ExtractionOutcome};
use crate::model::{ExtractionCounts, ExtractionRunManifest, LayoutPattern, SubjectStatus};
use crate::store::{
    ExtractionRunRecord, ReconcileReport, SubjectLocks, reconcile_subject, record_extraction_run,
};
use crate::util::{now_utc_string, read_text, sha256_text, write_json_pretty};

pub struct SubjectJob<'a> {
    pub subject_key: &'a str,
    pub source_path: &'a Path,
    pub forced: Option<LayoutPattern>,
    pub run_id: &'a str,
}

#[derive(Debug, Clone)]
pub struct SubjectRun {
    pub status: SubjectStatus,
    pub node_count: usize,
    pub manifest_path: PathBuf,
}

/// Lowercase, dash-separated form of a subject key for file names.
pub fn subject_slug(subject_key: &str) -> String {
    let mut slug = String::with_capacity(subject_key.len());
    for ch in subject_key.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// Extracts one subject and reconciles the result into staging. A failure is
/// recorded in the run history before it is returned.
pub fn process_subject(
    connection: &mut Connection,
    engine: &ExtractionEngine,
    locks: &SubjectLocks,
    lock_timeout: Duration,
    manifest_dir: &Path,
    job: &SubjectJob<'_>,
) -> Result<SubjectRun> {
    let started_at = now_utc_string();
    let raw = match read_text(job.source_path) {
        Ok(raw) => raw,
        Err(err) => {
            record_failure(connection, job, "", &started_at, &err);
            return Err(err);
        }
    };
    let source_sha256 = sha256_text(&raw);

    let staged = locks
        .acquire(job.subject_key, lock_timeout)
        .map_err(anyhow::Error::from)
        .and_then(|_guard| {
            let outcome = engine.extract(job.subject_key, &raw, job.forced)?;
            let report =
                reconcile_subject(connection, job.subject_key, job.run_id, &outcome.build.nodes)?;
            Ok((outcome, report))
        });
    let (outcome, report) = match staged {
        Ok(staged) => staged,
        Err(err) => {
            record_failure(connection, job, &source_sha256, &started_at, &err);
            return Err(err);
        }
    };

    let status = outcome.build.status();
    let warnings = collect_warnings(&outcome);
    let finished_at = now_utc_string();
    record_extraction_run(
        connection,
        &ExtractionRunRecord {
            run_id: job.run_id.to_string(),
            subject_key: job.subject_key.to_string(),
            source_path: job.source_path.display().to_string(),
            source_sha256: source_sha256.clone(),
            pattern: Some(outcome.detection.pattern),
            pattern_confidence: Some(outcome.detection.confidence),
            status,
            node_count: outcome.build.nodes.len(),
            orphan_repaired_count: outcome.build.orphan_repaired_count(),
            stitch_truncated_count: outcome.build.stitch_truncated_count(),
            loose_line_count: outcome.build.loose_lines.len(),
            warnings: warnings.clone(),
            error: None,
            started_at: started_at.clone(),
            finished_at: finished_at.clone(),
        },
    )
    .context("failed to record extraction run")?;

    let manifest = ExtractionRunManifest {
        manifest_version: 1,
        run_id: job.run_id.to_string(),
        subject_key: job.subject_key.to_string(),
        source_path: job.source_path.display().to_string(),
        source_sha256,
        pattern: outcome.detection.pattern,
        pattern_confidence: outcome.detection.confidence,
        pattern_forced: outcome.detection.forced,
        status,
        started_at,
        updated_at: finished_at,
        counts: extraction_counts(&outcome, &report),
        warnings,
    };
    let manifest_path = manifest_dir.join(format!(
        "extraction_run_{}_{}.json",
        job.run_id,
        subject_slug(job.subject_key)
    ));
    write_json_pretty(&manifest_path, &manifest)?;

    info!(
        subject_key = %job.subject_key,
        run_id = %job.run_id,
        status = status.as_str(),
        nodes = manifest.counts.node_count,
        orphan_repaired = manifest.counts.orphan_repaired_count,
        stitch_truncated = manifest.counts.stitch_truncated_count,
        manifest = %manifest_path.display(),
        "subject extracted"
    );
    Ok(SubjectRun {
        status,
        node_count: manifest.counts.node_count,
        manifest_path,
    })
}

fn record_failure(
    connection: &Connection,
    job: &SubjectJob<'_>,
    source_sha256: &str,
    started_at: &str,
    err: &anyhow::Error,
) {
    warn!(subject_key = %job.subject_key, run_id = %job.run_id, error = %err, "subject failed");
    let recorded = record_extraction_run(
        connection,
        &ExtractionRunRecord {
            run_id: job.run_id.to_string(),
            subject_key: job.subject_key.to_string(),
            source_path: job.source_path.display().to_string(),
            source_sha256: source_sha256.to_string(),
            pattern: None,
            pattern_confidence: None,
            status: SubjectStatus::Failed,
            node_count: 0,
            orphan_repaired_count: 0,
            stitch_truncated_count: 0,
            loose_line_count: 0,
            warnings: Vec::new(),
            error: Some(format!("{err:#}")),
            started_at: started_at.to_string(),
            finished_at: now_utc_string(),
        },
    );
    if let Err(record_err) = recorded {
        warn!(
            subject_key = %job.subject_key,
            run_id = %job.run_id,
            error = %record_err,
            "failed to record failed extraction run"
        );
    }
}

fn collect_warnings(outcome: &ExtractionOutcome) -> Vec<String> {
    let mut warnings = outcome
        .build
        .issues
        .iter()
        .map(|issue| issue.message.clone())
        .collect::<Vec<String>>();
    warnings.extend(
        outcome
            .build
            .loose_lines
            .iter()
            .map(|loose| format!("unattached line {}: {}", loose.line, loose.text)),
    );
    warnings
}

fn extraction_counts(outcome: &ExtractionOutcome, report: &ReconcileReport) -> ExtractionCounts {
    ExtractionCounts {
        input_line_count: outcome.document.input_line_count,
        normalized_line_count: outcome.document.lines.len(),
        section_lines_dropped: outcome.section_lines_dropped,
        header_lines_removed: outcome.document.header_lines_removed,
        footer_lines_removed: outcome.document.footer_lines_removed,
        noise_lines_removed: outcome.document.noise_lines_removed,
        dehyphenation_merges: outcome.document.dehyphenation_merges,
        node_count: outcome.build.nodes.len(),
        orphan_repaired_count: outcome.build.orphan_repaired_count(),
        stitch_truncated_count: outcome.build.stitch_truncated_count(),
        duplicates_collapsed: outcome.build.duplicates_collapsed,
        loose_line_count: outcome.build.loose_lines.len(),
        staging_inserted: report.inserted,
        staging_updated: report.updated,
        staging_unchanged: report.unchanged,
        staging_deleted: report.deleted,
        staging_orphaned: report.orphaned,
        curated_kept: report.curated_kept,
    }
}
