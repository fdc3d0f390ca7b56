use rusqlite::{Connection, params};
use serde::Serialize;

use crate::config::NodeBand;
use crate::error::Result;

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub subject_key: String,
    pub node_count: usize,
    pub orphan_count: usize,
    pub duplicate_count: usize,
    pub repaired_count: usize,
    pub truncated_count: usize,
    pub band: NodeBand,
    pub issues: Vec<String>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Checks the staging tree of one subject: every non-root resolves its parent
/// one level up, `(code, level)` pairs are unique and the node count sits in
/// `band`. Repaired and truncated nodes are counted but do not fail.
pub fn validate_staging(
    connection: &Connection,
    subject_key: &str,
    band: NodeBand,
) -> Result<ValidationReport> {
    let (node_count, repaired_count, truncated_count) = connection.query_row(
        "
        SELECT COUNT(*),
               COALESCE(SUM(orphan_repaired), 0),
               COALESCE(SUM(stitch_truncated), 0)
        FROM staging_topics
        WHERE subject_key = ?1
        ",
        [subject_key],
        |row| {
            Ok((
                row.get::<_, i64>(0)? as usize,
                row.get::<_, i64>(1)? as usize,
                row.get::<_, i64>(2)? as usize,
            ))
        },
    )?;

    let mut issues = Vec::new();

    let mut orphans = connection.prepare(
        "
        SELECT child.code, child.level, child.parent_code
        FROM staging_topics child
        WHERE child.subject_key = ?1
          AND (
            (child.level > 0 AND (
              child.parent_code IS NULL
              OR NOT EXISTS (
                SELECT 1
                FROM staging_topics parent
                WHERE parent.subject_key = child.subject_key
                  AND parent.code = child.parent_code
                  AND parent.level = child.level - 1
              )
            ))
            OR (child.level = 0 AND child.parent_code IS NOT NULL)
          )
        ORDER BY child.level ASC, child.code ASC
        ",
    )?;
    let orphan_rows = orphans.query_map(params![subject_key], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, u32>(1)?,
            row.get::<_, Option<String>>(2)?,
        ))
    })?;
    let mut orphan_count = 0usize;
    for row in orphan_rows {
        let (code, level, parent_code) = row?;
        orphan_count += 1;
        match parent_code {
            Some(parent_code) => issues.push(format!(
                "node {code} at level {level} points to unresolved parent {parent_code}"
            )),
            None => issues.push(format!("node {code} at level {level} has no parent")),
        }
    }

    let mut duplicates = connection.prepare(
        "
        SELECT code, level, COUNT(*)
        FROM staging_topics
        WHERE subject_key = ?1
        GROUP BY code, level
        HAVING COUNT(*) > 1
        ORDER BY level ASC, code ASC
        ",
    )?;
    let duplicate_rows = duplicates.query_map(params![subject_key], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, u32>(1)?,
            row.get::<_, i64>(2)?,
        ))
    })?;
    let mut duplicate_count = 0usize;
    for row in duplicate_rows {
        let (code, level, count) = row?;
        duplicate_count += 1;
        issues.push(format!("code {code} appears {count} times at level {level}"));
    }

    if !band.contains(node_count) {
        issues.push(format!(
            "node count {node_count} outside expected band {}..={}",
            band.min, band.max
        ));
    }

    Ok(ValidationReport {
        subject_key: subject_key.to_string(),
        node_count,
        orphan_count,
        duplicate_count,
        repaired_count,
        truncated_count,
        band,
        issues,
    })
}
