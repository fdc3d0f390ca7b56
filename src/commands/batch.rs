use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tracing::{info, warn};

use super::{SubjectJob, process_subject};
use crate::cli::{BatchArgs, StoreArgs};
use crate::extract::ExtractionEngine;
use crate::model::{
    BatchManifest, BatchRunManifest, BatchSubject, BatchSubjectResult, SubjectStatus,
};
use crate::store::{SubjectLocks, load_batch_statuses, record_batch_progress};
use crate::util::{now_utc_string, read_json, utc_compact_string, write_json_pretty};

struct BatchContext<'a> {
    store: &'a StoreArgs,
    engine: &'a ExtractionEngine,
    locks: &'a SubjectLocks,
    lock_timeout: Duration,
    manifest_dir: &'a Path,
    source_root: &'a Path,
    batch_id: &'a str,
    run_id: &'a str,
    queue: Mutex<VecDeque<(usize, &'a BatchSubject)>>,
}

pub fn run(args: BatchArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    if args.workers == 0 {
        bail!("--workers must be at least 1");
    }

    let manifest: BatchManifest = read_json(&args.batch_manifest)?;
    let config = args.store.load_config()?;
    let engine = ExtractionEngine::new(config).context("failed to compile line markers")?;
    let connection = args.store.open_database()?;
    let recorded = if args.force {
        HashMap::new()
    } else {
        load_batch_statuses(&connection, &manifest.batch_id)
            .context("failed to load batch progress")?
    };
    drop(connection);

    let run_id = format!("run-{}", utc_compact_string(started_ts));
    let manifest_dir = args.store.manifest_dir();
    let source_root = args
        .batch_manifest
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    let locks = SubjectLocks::new();

    let mut results = Vec::<(usize, BatchSubjectResult)>::new();
    let mut pending = VecDeque::new();
    for (index, subject) in manifest.subjects.iter().enumerate() {
        let subject_key = subject.subject_key();
        match recorded.get(&subject_key) {
            Some(status) if status.is_success() => {
                info!(
                    subject_key = %subject_key,
                    status = status.as_str(),
                    "skipping completed subject"
                );
                results.push((
                    index,
                    BatchSubjectResult {
                        subject_key,
                        status: *status,
                        run_id: None,
                        skipped: true,
                        message: None,
                    },
                ));
            }
            _ => pending.push_back((index, subject)),
        }
    }

    let workers = args.workers.min(pending.len()).max(1);
    info!(
        batch_id = %manifest.batch_id,
        run_id = %run_id,
        subjects = manifest.subjects.len(),
        pending = pending.len(),
        workers,
        "starting batch"
    );

    let context = BatchContext {
        store: &args.store,
        engine: &engine,
        locks: &locks,
        lock_timeout: Duration::from_secs(args.lock_timeout_secs),
        manifest_dir: &manifest_dir,
        source_root: &source_root,
        batch_id: &manifest.batch_id,
        run_id: &run_id,
        queue: Mutex::new(pending),
    };

    thread::scope(|scope| -> Result<()> {
        let handles = (0..workers)
            .map(|worker| {
                let context = &context;
                scope.spawn(move || run_worker(worker, context))
            })
            .collect::<Vec<_>>();
        for handle in handles {
            match handle.join() {
                Ok(worker_results) => results.extend(worker_results?),
                Err(_) => bail!("batch worker panicked"),
            }
        }
        Ok(())
    })?;
    results.sort_by_key(|(index, _)| *index);
    let results = results
        .into_iter()
        .map(|(_, result)| result)
        .collect::<Vec<BatchSubjectResult>>();

    let count = |status: SubjectStatus| {
        results
            .iter()
            .filter(|result| !result.skipped && result.status == status)
            .count()
    };
    let summary = BatchRunManifest {
        manifest_version: 1,
        batch_id: manifest.batch_id.clone(),
        started_at,
        updated_at: now_utc_string(),
        workers,
        subject_count: results.len(),
        ok_count: count(SubjectStatus::Ok),
        ok_with_flags_count: count(SubjectStatus::OkWithFlags),
        failed_count: count(SubjectStatus::Failed),
        skipped_count: results.iter().filter(|result| result.skipped).count(),
        results,
    };
    let summary_path = manifest_dir.join(format!(
        "batch_run_{}_{}.json",
        manifest.batch_id,
        utc_compact_string(started_ts)
    ));
    write_json_pretty(&summary_path, &summary)?;

    info!(
        batch_id = %summary.batch_id,
        ok = summary.ok_count,
        ok_with_flags = summary.ok_with_flags_count,
        failed = summary.failed_count,
        skipped = summary.skipped_count,
        manifest = %summary_path.display(),
        "batch complete"
    );

    if summary.failed_count > 0 {
        bail!(
            "{} of {} subjects failed in batch {}",
            summary.failed_count,
            summary.subject_count,
            summary.batch_id
        );
    }
    Ok(())
}

fn run_worker(
    worker: usize,
    context: &BatchContext<'_>,
) -> Result<Vec<(usize, BatchSubjectResult)>> {
    let mut connection = context.store.open_database()?;
    let mut results = Vec::new();

    loop {
        let next = context
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        let Some((index, subject)) = next else {
            break;
        };

        let subject_key = subject.subject_key();
        let source_path = resolve_source_path(context.source_root, &subject.source_path);
        let outcome = process_subject(
            &mut connection,
            context.engine,
            context.locks,
            context.lock_timeout,
            context.manifest_dir,
            &SubjectJob {
                subject_key: &subject_key,
                source_path: &source_path,
                forced: subject.pattern,
                run_id: context.run_id,
            },
        );

        let (status, message) = match outcome {
            Ok(run) => (run.status, None),
            Err(err) => {
                warn!(worker, subject_key = %subject_key, error = %err, "batch subject failed");
                (SubjectStatus::Failed, Some(format!("{err:#}")))
            }
        };
        record_batch_progress(
            &connection,
            context.batch_id,
            &subject_key,
            status,
            Some(context.run_id),
            message.as_deref(),
        )
        .with_context(|| format!("failed to record batch progress for {subject_key}"))?;

        results.push((
            index,
            BatchSubjectResult {
                subject_key,
                status,
                run_id: Some(context.run_id.to_string()),
                skipped: false,
                message,
            },
        ));
    }
    Ok(results)
}

/// Relative source paths are resolved against the batch manifest's directory.
pub(crate) fn resolve_source_path(source_root: &Path, source_path: &str) -> PathBuf {
    let path = Path::new(source_path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        source_root.join(path)
    }
}
