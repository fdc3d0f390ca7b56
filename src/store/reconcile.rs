use std::collections::{HashMap, HashSet};

use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::model::{NodeFlags, StagingRecord, TopicNode};
use crate::util::now_utc_string;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
    pub orphaned: usize,
    pub curated_kept: usize,
}

type NodeKey = (String, u32);

fn node_key(node: &TopicNode) -> NodeKey {
    (node.code.clone(), node.level)
}

fn parent_level(node: &TopicNode) -> Option<u32> {
    node.parent_code.as_ref().and_then(|_| node.level.checked_sub(1))
}

/// Replaces the staging rows of `subject_key` with `nodes`, keeping curated
/// rows. Runs in one immediate transaction: any error leaves staging as it
/// was before the call.
pub fn reconcile_subject(
    connection: &mut Connection,
    subject_key: &str,
    run_id: &str,
    nodes: &[TopicNode],
) -> Result<ReconcileReport> {
    reject_duplicate_codes(subject_key, nodes)?;

    let tx = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let now = now_utc_string();
    tx.execute(
        "INSERT INTO subjects(subject_key, created_at, updated_at) VALUES(?1, ?2, ?2)
         ON CONFLICT(subject_key) DO UPDATE SET updated_at=excluded.updated_at",
        params![subject_key, now],
    )?;

    let existing = load_staging(&tx, subject_key)?;
    let incoming = nodes.iter().map(node_key).collect::<HashSet<NodeKey>>();

    let mut doomed = existing
        .iter()
        .filter(|record| !record.curated && !incoming.contains(&node_key(&record.node)))
        .collect::<Vec<&StagingRecord>>();
    doomed.sort_by(|left, right| right.node.level.cmp(&left.node.level));
    let doomed_keys = doomed
        .iter()
        .map(|record| node_key(&record.node))
        .collect::<HashSet<NodeKey>>();

    let mut report = ReconcileReport::default();
    let mut repointed = HashSet::<NodeKey>::new();
    for record in &existing {
        let key = node_key(&record.node);
        if doomed_keys.contains(&key) {
            continue;
        }
        let (Some(parent_code), Some(parent_level)) =
            (record.node.parent_code.as_ref(), parent_level(&record.node))
        else {
            continue;
        };
        if !doomed_keys.contains(&(parent_code.clone(), parent_level)) {
            continue;
        }

        tx.execute(
            "UPDATE staging_topics SET parent_code=NULL, parent_level=NULL, updated_at=?4
             WHERE subject_key=?1 AND code=?2 AND level=?3",
            params![subject_key, record.node.code, record.node.level, now],
        )?;
        if record.curated {
            report.orphaned += 1;
            warn!(
                subject_key = %subject_key,
                code = %record.node.code,
                level = record.node.level,
                parent_code = %parent_code,
                "curated node lost its parent and is now orphaned"
            );
        } else {
            debug!(
                subject_key = %subject_key,
                code = %record.node.code,
                parent_code = %parent_code,
                "detached node from removed parent"
            );
        }
        repointed.insert(key);
    }

    for record in &doomed {
        tx.execute(
            "DELETE FROM staging_topics WHERE subject_key=?1 AND code=?2 AND level=?3",
            params![subject_key, record.node.code, record.node.level],
        )?;
        report.deleted += 1;
    }

    let existing_by_key = existing
        .iter()
        .map(|record| (node_key(&record.node), record))
        .collect::<HashMap<NodeKey, &StagingRecord>>();

    let mut ordered = nodes.iter().collect::<Vec<&TopicNode>>();
    ordered.sort_by_key(|node| node.level);
    for node in ordered {
        let key = node_key(node);
        match existing_by_key.get(&key) {
            Some(record) if record.curated => {
                report.curated_kept += 1;
                debug!(subject_key = %subject_key, code = %node.code, "kept curated node");
            }
            Some(record) if !repointed.contains(&key) && same_content(&record.node, node) => {
                report.unchanged += 1;
            }
            Some(_) => {
                tx.execute(
                    "UPDATE staging_topics
                     SET title=?4, parent_code=?5, parent_level=?6, source_hash=?7,
                         order_index=?8, run_id=?9, promoted=0, orphan_repaired=?10,
                         stitch_truncated=?11, updated_at=?12
                     WHERE subject_key=?1 AND code=?2 AND level=?3",
                    params![
                        subject_key,
                        node.code,
                        node.level,
                        node.title,
                        node.parent_code,
                        parent_level(node),
                        node.source_hash,
                        node.order_index,
                        run_id,
                        node.flags.orphan_repaired,
                        node.flags.stitch_truncated,
                        now,
                    ],
                )
                .map_err(|error| unique_violation(error, subject_key, node))?;
                report.updated += 1;
            }
            None => {
                tx.execute(
                    "INSERT INTO staging_topics(
                       subject_key, code, level, title, parent_code, parent_level, source_hash,
                       order_index, run_id, promoted, curated, orphan_repaired, stitch_truncated,
                       updated_at
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, 0, ?10, ?11, ?12)",
                    params![
                        subject_key,
                        node.code,
                        node.level,
                        node.title,
                        node.parent_code,
                        parent_level(node),
                        node.source_hash,
                        node.order_index,
                        run_id,
                        node.flags.orphan_repaired,
                        node.flags.stitch_truncated,
                        now,
                    ],
                )
                .map_err(|error| unique_violation(error, subject_key, node))?;
                report.inserted += 1;
            }
        }
    }

    tx.commit()?;
    info!(
        subject_key = %subject_key,
        run_id = %run_id,
        inserted = report.inserted,
        updated = report.updated,
        unchanged = report.unchanged,
        deleted = report.deleted,
        orphaned = report.orphaned,
        curated_kept = report.curated_kept,
        "reconciled staging"
    );
    Ok(report)
}

fn reject_duplicate_codes(subject_key: &str, nodes: &[TopicNode]) -> Result<()> {
    let mut seen = HashSet::<(&str, u32)>::new();
    for node in nodes {
        if !seen.insert((node.code.as_str(), node.level)) {
            return Err(EngineError::DuplicateCode {
                subject_key: subject_key.to_string(),
                code: node.code.clone(),
                level: node.level,
            });
        }
    }
    Ok(())
}

fn unique_violation(error: rusqlite::Error, subject_key: &str, node: &TopicNode) -> EngineError {
    match &error {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            EngineError::DuplicateCode {
                subject_key: subject_key.to_string(),
                code: node.code.clone(),
                level: node.level,
            }
        }
        _ => EngineError::Database(error),
    }
}

fn same_content(stored: &TopicNode, incoming: &TopicNode) -> bool {
    stored.title == incoming.title
        && stored.parent_code == incoming.parent_code
        && stored.source_hash == incoming.source_hash
        && stored.order_index == incoming.order_index
        && stored.flags == incoming.flags
}

fn staging_from_row(row: &Row<'_>) -> rusqlite::Result<StagingRecord> {
    Ok(StagingRecord {
        node: TopicNode {
            subject_key: row.get(0)?,
            code: row.get(1)?,
            level: row.get(2)?,
            title: row.get(3)?,
            parent_code: row.get(4)?,
            source_hash: row.get(5)?,
            order_index: row.get(6)?,
            flags: NodeFlags {
                orphan_repaired: row.get(10)?,
                stitch_truncated: row.get(11)?,
            },
        },
        run_id: row.get(7)?,
        promoted: row.get(8)?,
        curated: row.get(9)?,
    })
}

pub fn load_staging(connection: &Connection, subject_key: &str) -> Result<Vec<StagingRecord>> {
    let mut statement = connection.prepare(
        "
        SELECT subject_key, code, level, title, parent_code, source_hash, order_index,
               run_id, promoted, curated, orphan_repaired, stitch_truncated
        FROM staging_topics
        WHERE subject_key = ?1
        ORDER BY order_index ASC, level ASC, code ASC
        ",
    )?;
    let rows = statement.query_map([subject_key], staging_from_row)?;

    let mut records = Vec::new();
    for row in rows {
        records.push(row?);
    }
    Ok(records)
}

pub fn mark_curated(
    connection: &Connection,
    subject_key: &str,
    code: &str,
    level: u32,
    curated: bool,
) -> Result<()> {
    let current = connection
        .query_row(
            "SELECT curated FROM staging_topics WHERE subject_key=?1 AND code=?2 AND level=?3",
            params![subject_key, code, level],
            |row| row.get::<_, bool>(0),
        )
        .optional()?;

    match current {
        None => Err(EngineError::NodeNotFound {
            subject_key: subject_key.to_string(),
            code: code.to_string(),
            level,
        }),
        Some(existing) if existing == curated => Ok(()),
        Some(_) => {
            connection.execute(
                "UPDATE staging_topics SET curated=?4, updated_at=?5
                 WHERE subject_key=?1 AND code=?2 AND level=?3",
                params![subject_key, code, level, curated, now_utc_string()],
            )?;
            info!(subject_key = %subject_key, code = %code, level, curated, "updated curation flag");
            Ok(())
        }
    }
}
