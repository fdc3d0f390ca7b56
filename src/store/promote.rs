use std::collections::HashMap;
use std::path::Path;

use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::reconcile::load_staging;
use super::runs::record_promotion_audit;
use super::validate::{ValidationReport, validate_staging};
use crate::config::NodeBand;
use crate::error::{EngineError, Result};
use crate::model::{ProductionRecord, PromotionAudit};
use crate::util::now_utc_string;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionState {
    Staged,
    Validated,
    Promoted,
    Rejected,
}

impl PromotionState {
    pub fn as_str(self) -> &'static str {
        match self {
            PromotionState::Staged => "staged",
            PromotionState::Validated => "validated",
            PromotionState::Promoted => "promoted",
            PromotionState::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PromotionOutcome {
    pub state: PromotionState,
    pub transitions: Vec<PromotionState>,
    pub version: Option<i64>,
    pub report: ValidationReport,
    pub audit: PromotionAudit,
}

impl PromotionOutcome {
    pub fn ensure_promoted(&self) -> Result<i64> {
        match (self.state, self.version) {
            (PromotionState::Promoted, Some(version)) => Ok(version),
            _ => Err(EngineError::ValidationFailed {
                subject_key: self.report.subject_key.clone(),
                issues: self.report.issues.clone(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RollbackOutcome {
    pub subject_key: String,
    pub from_version: Option<i64>,
    pub to_version: i64,
    pub audit: PromotionAudit,
}

fn audit_for(
    action: &str,
    state: PromotionState,
    version: Option<i64>,
    report: &ValidationReport,
) -> PromotionAudit {
    PromotionAudit {
        subject_key: report.subject_key.clone(),
        action: action.to_string(),
        version,
        node_count: report.node_count,
        orphan_count: report.orphan_count + report.repaired_count,
        validation_result: state.as_str().to_string(),
        issues: report.issues.clone(),
        recorded_at: now_utc_string(),
    }
}

/// Copies the staging tree into production as a new active version. A failed
/// validation commits only the audit row; production is left untouched.
pub fn promote_subject(
    connection: &mut Connection,
    subject_key: &str,
    band: NodeBand,
) -> Result<PromotionOutcome> {
    let tx = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let mut transitions = vec![PromotionState::Staged];

    let report = validate_staging(&tx, subject_key, band)?;
    if !report.passed() {
        transitions.push(PromotionState::Rejected);
        let audit = audit_for("promote", PromotionState::Rejected, None, &report);
        record_promotion_audit(&tx, &audit)?;
        tx.commit()?;
        warn!(
            subject_key = %subject_key,
            issues = report.issues.len(),
            "promotion rejected by validation"
        );
        return Ok(PromotionOutcome {
            state: PromotionState::Rejected,
            transitions,
            version: None,
            report,
            audit,
        });
    }
    transitions.push(PromotionState::Validated);
    debug!(subject_key = %subject_key, nodes = report.node_count, "staging validated");

    let previous = active_version(&tx, subject_key)?;
    let version: i64 = tx.query_row(
        "SELECT COALESCE(MAX(version), 0) + 1 FROM production_versions WHERE subject_key = ?1",
        [subject_key],
        |row| row.get(0),
    )?;
    let now = now_utc_string();

    tx.execute(
        "UPDATE production_versions SET status='archived' WHERE subject_key=?1 AND status='active'",
        [subject_key],
    )?;
    tx.execute(
        "UPDATE production_topics SET active=0 WHERE subject_key=?1 AND active=1",
        [subject_key],
    )?;
    tx.execute(
        "INSERT INTO production_versions(subject_key, version, node_count, repaired_count, status, promoted_at)
         VALUES (?1, ?2, ?3, ?4, 'active', ?5)",
        params![
            subject_key,
            version,
            report.node_count as i64,
            report.repaired_count as i64,
            now
        ],
    )?;

    let mut records = load_staging(&tx, subject_key)?;
    records.sort_by_key(|record| (record.node.level, record.node.order_index));

    let mut topic_ids = HashMap::<(String, u32), i64>::new();
    {
        let mut insert = tx.prepare(
            "INSERT INTO production_topics(
               subject_key, version, code, level, title, parent_id, source_hash, order_index,
               active, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, ?9)",
        )?;
        for record in &records {
            let node = &record.node;
            let parent_id = match (&node.parent_code, node.level.checked_sub(1)) {
                (Some(parent_code), Some(parent_level)) => Some(
                    topic_ids
                        .get(&(parent_code.clone(), parent_level))
                        .copied()
                        .ok_or_else(|| EngineError::ValidationFailed {
                            subject_key: subject_key.to_string(),
                            issues: vec![format!(
                                "parent {parent_code} of {} was not promoted before it",
                                node.code
                            )],
                        })?,
                ),
                _ => None,
            };

            insert.execute(params![
                subject_key,
                version,
                node.code,
                node.level,
                node.title,
                parent_id,
                node.source_hash,
                node.order_index,
                now,
            ])?;
            topic_ids.insert((node.code.clone(), node.level), tx.last_insert_rowid());
        }
    }

    tx.execute(
        "UPDATE staging_topics SET promoted=1 WHERE subject_key=?1",
        [subject_key],
    )?;
    let audit = audit_for("promote", PromotionState::Promoted, Some(version), &report);
    record_promotion_audit(&tx, &audit)?;
    tx.commit()?;
    transitions.push(PromotionState::Promoted);

    info!(
        subject_key = %subject_key,
        version,
        previous_version = ?previous,
        nodes = report.node_count,
        "promoted staging to production"
    );
    Ok(PromotionOutcome {
        state: PromotionState::Promoted,
        transitions,
        version: Some(version),
        report,
        audit,
    })
}

/// Reactivates an archived version. Without `to_version` the newest archived
/// version older than the active one is used.
pub fn rollback_subject(
    connection: &mut Connection,
    subject_key: &str,
    to_version: Option<i64>,
) -> Result<RollbackOutcome> {
    let tx = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let current = active_version(&tx, subject_key)?;

    let target: Option<(i64, i64)> = match to_version {
        Some(version) if Some(version) == current => None,
        Some(version) => tx
            .query_row(
                "SELECT version, node_count FROM production_versions
                 WHERE subject_key=?1 AND version=?2",
                params![subject_key, version],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?,
        None => tx
            .query_row(
                "SELECT version, node_count FROM production_versions
                 WHERE subject_key=?1 AND status='archived' AND (?2 IS NULL OR version < ?2)
                 ORDER BY version DESC
                 LIMIT 1",
                params![subject_key, current],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?,
    };
    let Some((target, node_count)) = target else {
        return Err(EngineError::NoRollbackTarget(subject_key.to_string()));
    };

    tx.execute(
        "UPDATE production_versions SET status='archived' WHERE subject_key=?1 AND status='active'",
        [subject_key],
    )?;
    tx.execute(
        "UPDATE production_versions SET status='active' WHERE subject_key=?1 AND version=?2",
        params![subject_key, target],
    )?;
    tx.execute(
        "UPDATE production_topics SET active = (version = ?2) WHERE subject_key=?1",
        params![subject_key, target],
    )?;

    let audit = PromotionAudit {
        subject_key: subject_key.to_string(),
        action: "rollback".to_string(),
        version: Some(target),
        node_count: node_count as usize,
        orphan_count: 0,
        validation_result: "rolled_back".to_string(),
        issues: Vec::new(),
        recorded_at: now_utc_string(),
    };
    record_promotion_audit(&tx, &audit)?;
    tx.commit()?;

    info!(
        subject_key = %subject_key,
        from_version = ?current,
        to_version = target,
        "rolled back production"
    );
    Ok(RollbackOutcome {
        subject_key: subject_key.to_string(),
        from_version: current,
        to_version: target,
        audit,
    })
}

pub fn active_version(connection: &Connection, subject_key: &str) -> Result<Option<i64>> {
    let version = connection
        .query_row(
            "SELECT version FROM production_versions WHERE subject_key=?1 AND status='active'",
            [subject_key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(version)
}

/// Rows of one version, or of the active version when `version` is `None`.
pub fn load_production(
    connection: &Connection,
    subject_key: &str,
    version: Option<i64>,
) -> Result<Vec<ProductionRecord>> {
    let mut statement = connection.prepare(
        "
        SELECT topic_id, subject_key, code, level, title, parent_id, source_hash, version, active
        FROM production_topics
        WHERE subject_key = ?1
          AND ((?2 IS NULL AND active = 1) OR version = ?2)
        ORDER BY level ASC, order_index ASC, topic_id ASC
        ",
    )?;
    let rows = statement.query_map(params![subject_key, version], |row| {
        Ok(ProductionRecord {
            topic_id: row.get(0)?,
            subject_key: row.get(1)?,
            code: row.get(2)?,
            level: row.get(3)?,
            title: row.get(4)?,
            parent_id: row.get(5)?,
            source_hash: row.get(6)?,
            version: row.get(7)?,
            active: row.get(8)?,
        })
    })?;

    let mut records = Vec::new();
    for row in rows {
        records.push(row?);
    }
    Ok(records)
}

/// Point-in-time copy of the whole database. The destination must not exist.
pub fn snapshot_database(connection: &Connection, destination: &Path) -> Result<()> {
    connection.execute(
        "VACUUM INTO ?1",
        [destination.to_string_lossy().into_owned()],
    )?;
    info!(path = %destination.display(), "wrote database snapshot");
    Ok(())
}
