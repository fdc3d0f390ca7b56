use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;

use super::batch::resolve_source_path;
use super::*;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::store::{list_subject_summaries, load_staging, open_database};

const SUBJECT: &str = "AQA/A-Level/Biology";
const OUTLINE: &str = "1 Cells\n1.1 Structure\n1.2 Transport\n\x0c2 Genetics\n";

struct Workspace {
    root: PathBuf,
}

impl Workspace {
    fn new(name: &str) -> Self {
        let stamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let root = std::env::temp_dir().join(format!(
            "topicforge_{}_{}_{}",
            name,
            std::process::id(),
            stamp
        ));
        fs::create_dir_all(&root).expect("create workspace");
        Self { root }
    }

    fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.root.join(name);
        fs::write(&path, contents).expect("write source");
        path
    }

    fn manifest_dir(&self) -> PathBuf {
        self.root.join("manifests")
    }

    fn connection(&self) -> Connection {
        open_database(&self.root.join("topicforge.sqlite")).expect("open database")
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.root);
    }
}

fn run_job(
    workspace: &Workspace,
    connection: &mut Connection,
    locks: &SubjectLocks,
    source_path: &Path,
    run_id: &str,
) -> Result<SubjectRun> {
    let engine = ExtractionEngine::new(EngineConfig::default()).expect("engine");
    process_subject(
        connection,
        &engine,
        locks,
        Duration::ZERO,
        &workspace.manifest_dir(),
        &SubjectJob {
            subject_key: SUBJECT,
            source_path,
            forced: None,
            run_id,
        },
    )
}

#[test]
fn subject_slug_flattens_separators() {
    assert_eq!(subject_slug("AQA/A-Level/Biology"), "aqa-a-level-biology");
    assert_eq!(subject_slug(" Edexcel / GCSE (9-1) "), "edexcel-gcse-9-1");
    assert_eq!(subject_slug("///"), "");
}

#[test]
fn batch_sources_resolve_against_manifest_directory() {
    let root = Path::new("/data/batches");
    assert_eq!(
        resolve_source_path(root, "aqa/biology.txt"),
        PathBuf::from("/data/batches/aqa/biology.txt")
    );
    assert_eq!(
        resolve_source_path(root, "/srv/specs/physics.txt"),
        PathBuf::from("/srv/specs/physics.txt")
    );
}

#[test]
fn processing_subject_stages_nodes_and_writes_manifest() {
    let workspace = Workspace::new("process");
    let source = workspace.write("biology.txt", OUTLINE);
    let mut connection = workspace.connection();
    let locks = SubjectLocks::new();

    let run = run_job(&workspace, &mut connection, &locks, &source, "run-1").expect("process");
    assert_eq!(run.status, SubjectStatus::Ok);
    assert_eq!(run.node_count, 4);
    assert!(run.manifest_path.exists());
    assert_eq!(load_staging(&connection, SUBJECT).expect("staging").len(), 4);
    locks.acquire(SUBJECT, Duration::ZERO).expect("lock released after run");

    let rerun = run_job(&workspace, &mut connection, &locks, &source, "run-2").expect("rerun");
    let manifest: serde_json::Value =
        serde_json::from_slice(&fs::read(&rerun.manifest_path).expect("read manifest"))
            .expect("parse manifest");
    assert_eq!(manifest["counts"]["staging_unchanged"], 4);
    assert_eq!(manifest["counts"]["staging_inserted"], 0);
    assert_eq!(manifest["pattern"], "numbered_outline");
    assert_eq!(manifest["status"], "ok");
}

#[test]
fn unrecognized_source_is_recorded_as_failed_run() {
    let workspace = Workspace::new("unrecognized");
    let source = workspace.write("prose.txt", "Just prose.\nNo structure here.\n");
    let mut connection = workspace.connection();
    let locks = SubjectLocks::new();

    let err = run_job(&workspace, &mut connection, &locks, &source, "run-1")
        .expect_err("no pattern");
    assert!(matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::PatternNotRecognized { .. })
    ));

    let summaries = list_subject_summaries(&connection, Some(SUBJECT)).expect("summaries");
    assert_eq!(summaries[0].last_run_status.as_deref(), Some("failed"));
    assert_eq!(summaries[0].staging_nodes, 0);
}

#[test]
fn missing_source_is_recorded_as_failed_run() {
    let workspace = Workspace::new("missing");
    let mut connection = workspace.connection();
    let locks = SubjectLocks::new();

    run_job(
        &workspace,
        &mut connection,
        &locks,
        &workspace.root.join("absent.txt"),
        "run-1",
    )
    .expect_err("missing file");

    let summaries = list_subject_summaries(&connection, Some(SUBJECT)).expect("summaries");
    assert_eq!(summaries[0].last_run_status.as_deref(), Some("failed"));
}

#[test]
fn locked_subject_is_not_processed() {
    let workspace = Workspace::new("locked");
    let source = workspace.write("biology.txt", OUTLINE);
    let mut connection = workspace.connection();
    let locks = SubjectLocks::new();
    let _held = locks.acquire(SUBJECT, Duration::ZERO).expect("hold lock");

    let err =
        run_job(&workspace, &mut connection, &locks, &source, "run-1").expect_err("locked");
    assert!(matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::SubjectLocked(_))
    ));
    assert!(load_staging(&connection, SUBJECT).expect("staging").is_empty());
}

#[test]
fn failure_survives_unrecordable_run_history() {
    let workspace = Workspace::new("unrecordable");
    let source = workspace.write("biology.txt", OUTLINE);
    let mut connection = Connection::open_in_memory().expect("bare connection");
    let locks = SubjectLocks::new();
    let _held = locks.acquire(SUBJECT, Duration::ZERO).expect("hold lock");

    let err =
        run_job(&workspace, &mut connection, &locks, &source, "run-1").expect_err("locked");
    assert!(matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::SubjectLocked(_))
    ));
}
