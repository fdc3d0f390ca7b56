use std::io::{self, Write};

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::Serialize;
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::model::{PromotionAudit, TopicNode};
use crate::store::{
    SubjectSummary, list_subject_summaries, load_production, load_promotion_audits, load_staging,
};

const RECENT_AUDITS: usize = 5;

#[derive(Debug, Serialize)]
struct SubjectDetail {
    summary: SubjectSummary,
    production_nodes: usize,
    flagged: Vec<TopicNode>,
    recent_audits: Vec<PromotionAudit>,
}

#[derive(Debug, Serialize)]
struct StatusReport {
    subjects: Vec<SubjectSummary>,
    detail: Option<SubjectDetail>,
}

pub fn run(args: StatusArgs) -> Result<()> {
    let db_path = args.store.db_path();
    info!(cache_root = %args.store.cache_root.display(), "status requested");

    if !db_path.exists() {
        warn!(path = %db_path.display(), "database file missing");
        return Ok(());
    }

    let connection = args.store.open_database()?;
    let subjects = list_subject_summaries(&connection, args.subject_key.as_deref())?;
    info!(path = %db_path.display(), subjects = subjects.len(), "database status");

    let detail = match (&args.subject_key, subjects.first()) {
        (Some(_), Some(summary)) => Some(load_detail(&connection, summary.clone())?),
        (Some(subject_key), None) => {
            warn!(subject_key = %subject_key, "subject not found");
            None
        }
        (None, _) => None,
    };
    let report = StatusReport { subjects, detail };

    if args.json {
        let mut output = io::BufWriter::new(io::stdout().lock());
        serde_json::to_writer_pretty(&mut output, &report)
            .context("failed to serialize status json output")?;
        writeln!(output)?;
        output.flush()?;
    } else {
        write_text_report(&report)?;
    }
    Ok(())
}

fn load_detail(connection: &Connection, summary: SubjectSummary) -> Result<SubjectDetail> {
    let production_nodes = load_production(connection, &summary.subject_key, None)?.len();
    let flagged = load_staging(connection, &summary.subject_key)?
        .into_iter()
        .filter(|record| record.node.flags.any())
        .map(|record| record.node)
        .collect();
    let mut recent_audits = load_promotion_audits(connection, &summary.subject_key)?;
    recent_audits.truncate(RECENT_AUDITS);

    Ok(SubjectDetail {
        summary,
        production_nodes,
        flagged,
        recent_audits,
    })
}

fn write_text_report(report: &StatusReport) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());
    writeln!(output, "Subjects: {}", report.subjects.len())?;

    for summary in &report.subjects {
        writeln!(output, "{}", summary.subject_key)?;
        writeln!(
            output,
            "\tstaging={} curated={} flagged={} promoted={}",
            summary.staging_nodes,
            summary.curated_nodes,
            summary.flagged_nodes,
            summary.promoted_nodes,
        )?;
        writeln!(
            output,
            "\tlast_run={} status={} at={}\tproduction_version={}",
            summary.last_run_id.as_deref().unwrap_or("-"),
            summary.last_run_status.as_deref().unwrap_or("-"),
            summary.last_run_at.as_deref().unwrap_or("-"),
            summary
                .active_version
                .map(|version| version.to_string())
                .unwrap_or_else(|| "-".to_string()),
        )?;
    }

    if let Some(detail) = &report.detail {
        writeln!(output, "Production nodes: {}", detail.production_nodes)?;
        writeln!(output, "Flagged nodes: {}", detail.flagged.len())?;
        for node in &detail.flagged {
            let mut flags = Vec::new();
            if node.flags.orphan_repaired {
                flags.push("orphan_repaired");
            }
            if node.flags.stitch_truncated {
                flags.push("stitch_truncated");
            }
            writeln!(
                output,
                "\t{}\tlevel {}\t{}\t{}",
                node.code,
                node.level,
                flags.join(","),
                node.title
            )?;
        }
        writeln!(output, "Recent audits: {}", detail.recent_audits.len())?;
        for audit in &detail.recent_audits {
            writeln!(
                output,
                "\t{}\t{}\t{}\tversion={}\tnodes={} orphans={}",
                audit.recorded_at,
                audit.action,
                audit.validation_result,
                audit
                    .version
                    .map(|version| version.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                audit.node_count,
                audit.orphan_count,
            )?;
            for issue in &audit.issues {
                writeln!(output, "\t\t{issue}")?;
            }
        }
    }

    output.flush()?;
    Ok(())
}
