use std::collections::HashMap;

use rusqlite::{Connection, params};
use serde::Serialize;

use crate::error::Result;
use crate::model::{LayoutPattern, PromotionAudit, SubjectStatus};
use crate::util::now_utc_string;

#[derive(Debug, Clone, Serialize)]
pub struct ExtractionRunRecord {
    pub run_id: String,
    pub subject_key: String,
    pub source_path: String,
    pub source_sha256: String,
    pub pattern: Option<LayoutPattern>,
    pub pattern_confidence: Option<f64>,
    pub status: SubjectStatus,
    pub node_count: usize,
    pub orphan_repaired_count: usize,
    pub stitch_truncated_count: usize,
    pub loose_line_count: usize,
    pub warnings: Vec<String>,
    pub error: Option<String>,
    pub started_at: String,
    pub finished_at: String,
}

pub fn record_extraction_run(connection: &Connection, record: &ExtractionRunRecord) -> Result<()> {
    let warnings_json = serde_json::to_string(&record.warnings)?;
    connection.execute(
        "
        INSERT INTO extraction_runs(
          run_id, subject_key, source_path, source_sha256, pattern, pattern_confidence, status,
          node_count, orphan_repaired_count, stitch_truncated_count, loose_line_count,
          warnings_json, error, started_at, finished_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
        ON CONFLICT(run_id, subject_key) DO UPDATE SET
          source_path=excluded.source_path,
          source_sha256=excluded.source_sha256,
          pattern=excluded.pattern,
          pattern_confidence=excluded.pattern_confidence,
          status=excluded.status,
          node_count=excluded.node_count,
          orphan_repaired_count=excluded.orphan_repaired_count,
          stitch_truncated_count=excluded.stitch_truncated_count,
          loose_line_count=excluded.loose_line_count,
          warnings_json=excluded.warnings_json,
          error=excluded.error,
          finished_at=excluded.finished_at
        ",
        params![
            record.run_id,
            record.subject_key,
            record.source_path,
            record.source_sha256,
            record.pattern.map(LayoutPattern::as_str),
            record.pattern_confidence,
            record.status.as_str(),
            record.node_count as i64,
            record.orphan_repaired_count as i64,
            record.stitch_truncated_count as i64,
            record.loose_line_count as i64,
            warnings_json,
            record.error,
            record.started_at,
            record.finished_at,
        ],
    )?;
    Ok(())
}

pub fn record_promotion_audit(connection: &Connection, audit: &PromotionAudit) -> Result<()> {
    let issues_json = serde_json::to_string(&audit.issues)?;
    connection.execute(
        "
        INSERT INTO promotion_audit(
          subject_key, action, version, node_count, orphan_count, validation_result,
          issues_json, recorded_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ",
        params![
            audit.subject_key,
            audit.action,
            audit.version,
            audit.node_count as i64,
            audit.orphan_count as i64,
            audit.validation_result,
            issues_json,
            audit.recorded_at,
        ],
    )?;
    Ok(())
}

/// Newest first.
pub fn load_promotion_audits(
    connection: &Connection,
    subject_key: &str,
) -> Result<Vec<PromotionAudit>> {
    let mut statement = connection.prepare(
        "
        SELECT subject_key, action, version, node_count, orphan_count, validation_result,
               issues_json, recorded_at
        FROM promotion_audit
        WHERE subject_key = ?1
        ORDER BY audit_id DESC
        ",
    )?;
    let rows = statement.query_map([subject_key], |row| {
        Ok((
            PromotionAudit {
                subject_key: row.get(0)?,
                action: row.get(1)?,
                version: row.get(2)?,
                node_count: row.get::<_, i64>(3)? as usize,
                orphan_count: row.get::<_, i64>(4)? as usize,
                validation_result: row.get(5)?,
                issues: Vec::new(),
                recorded_at: row.get(7)?,
            },
            row.get::<_, String>(6)?,
        ))
    })?;

    let mut audits = Vec::new();
    for row in rows {
        let (mut audit, issues_json) = row?;
        audit.issues = serde_json::from_str(&issues_json)?;
        audits.push(audit);
    }
    Ok(audits)
}

pub fn record_batch_progress(
    connection: &Connection,
    batch_id: &str,
    subject_key: &str,
    status: SubjectStatus,
    run_id: Option<&str>,
    message: Option<&str>,
) -> Result<()> {
    connection.execute(
        "
        INSERT INTO batch_progress(batch_id, subject_key, status, run_id, message, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(batch_id, subject_key) DO UPDATE SET
          status=excluded.status,
          run_id=excluded.run_id,
          message=excluded.message,
          updated_at=excluded.updated_at
        ",
        params![
            batch_id,
            subject_key,
            status.as_str(),
            run_id,
            message,
            now_utc_string()
        ],
    )?;
    Ok(())
}

/// Recorded status per subject for one batch. Rows with an unrecognized status
/// are skipped so they get processed again.
pub fn load_batch_statuses(
    connection: &Connection,
    batch_id: &str,
) -> Result<HashMap<String, SubjectStatus>> {
    let mut statement = connection
        .prepare("SELECT subject_key, status FROM batch_progress WHERE batch_id = ?1")?;
    let rows = statement.query_map([batch_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut statuses = HashMap::new();
    for row in rows {
        let (subject_key, status) = row?;
        if let Some(status) = SubjectStatus::parse(&status) {
            statuses.insert(subject_key, status);
        }
    }
    Ok(statuses)
}

#[derive(Debug, Clone, Serialize)]
pub struct SubjectSummary {
    pub subject_key: String,
    pub staging_nodes: usize,
    pub curated_nodes: usize,
    pub flagged_nodes: usize,
    pub promoted_nodes: usize,
    pub last_run_id: Option<String>,
    pub last_run_status: Option<String>,
    pub last_run_at: Option<String>,
    pub active_version: Option<i64>,
}

pub fn list_subject_summaries(
    connection: &Connection,
    subject_key: Option<&str>,
) -> Result<Vec<SubjectSummary>> {
    let mut statement = connection.prepare(
        "
        SELECT
          s.subject_key,
          (SELECT COUNT(*) FROM staging_topics t WHERE t.subject_key = s.subject_key),
          (SELECT COUNT(*) FROM staging_topics t
             WHERE t.subject_key = s.subject_key AND t.curated = 1),
          (SELECT COUNT(*) FROM staging_topics t
             WHERE t.subject_key = s.subject_key
               AND (t.orphan_repaired = 1 OR t.stitch_truncated = 1)),
          (SELECT COUNT(*) FROM staging_topics t
             WHERE t.subject_key = s.subject_key AND t.promoted = 1),
          r.run_id,
          r.status,
          r.finished_at,
          (SELECT v.version FROM production_versions v
             WHERE v.subject_key = s.subject_key AND v.status = 'active')
        FROM (
          SELECT subject_key FROM subjects
          UNION
          SELECT subject_key FROM extraction_runs
        ) s
        LEFT JOIN extraction_runs r
          ON r.rowid = (
            SELECT r2.rowid FROM extraction_runs r2
            WHERE r2.subject_key = s.subject_key
            ORDER BY r2.finished_at DESC, r2.rowid DESC
            LIMIT 1
          )
        WHERE ?1 IS NULL OR s.subject_key = ?1
        ORDER BY s.subject_key ASC
        ",
    )?;
    let rows = statement.query_map([subject_key], |row| {
        Ok(SubjectSummary {
            subject_key: row.get(0)?,
            staging_nodes: row.get::<_, i64>(1)? as usize,
            curated_nodes: row.get::<_, i64>(2)? as usize,
            flagged_nodes: row.get::<_, i64>(3)? as usize,
            promoted_nodes: row.get::<_, i64>(4)? as usize,
            last_run_id: row.get(5)?,
            last_run_status: row.get(6)?,
            last_run_at: row.get(7)?,
            active_version: row.get(8)?,
        })
    })?;

    let mut summaries = Vec::new();
    for row in rows {
        summaries.push(row?);
    }
    Ok(summaries)
}
