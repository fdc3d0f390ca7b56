use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutPattern {
    TablePair,
    NumberedOutline,
    OptionCode,
    BulletList,
    Unknown,
}

impl LayoutPattern {
    pub const CANDIDATES: [LayoutPattern; 4] = [
        LayoutPattern::TablePair,
        LayoutPattern::OptionCode,
        LayoutPattern::NumberedOutline,
        LayoutPattern::BulletList,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LayoutPattern::TablePair => "table_pair",
            LayoutPattern::NumberedOutline => "numbered_outline",
            LayoutPattern::OptionCode => "option_code",
            LayoutPattern::BulletList => "bullet_list",
            LayoutPattern::Unknown => "unknown",
        }
    }
}

impl fmt::Display for LayoutPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFlags {
    pub orphan_repaired: bool,
    pub stitch_truncated: bool,
}

impl NodeFlags {
    pub fn any(self) -> bool {
        self.orphan_repaired || self.stitch_truncated
    }
}

/// One entry of an extracted topic tree. `parent_code` is `None` exactly when
/// `level` is 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicNode {
    pub subject_key: String,
    pub code: String,
    pub level: u32,
    pub title: String,
    pub parent_code: Option<String>,
    pub source_hash: String,
    pub order_index: u32,
    #[serde(default)]
    pub flags: NodeFlags,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagingRecord {
    pub node: TopicNode,
    pub run_id: String,
    pub promoted: bool,
    pub curated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductionRecord {
    pub topic_id: i64,
    pub subject_key: String,
    pub code: String,
    pub level: u32,
    pub title: String,
    pub parent_id: Option<i64>,
    pub source_hash: String,
    pub version: i64,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubjectStatus {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "ok-with-flags")]
    OkWithFlags,
    #[serde(rename = "failed")]
    Failed,
}

impl SubjectStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SubjectStatus::Ok => "ok",
            SubjectStatus::OkWithFlags => "ok-with-flags",
            SubjectStatus::Failed => "failed",
        }
    }

    pub fn is_success(self) -> bool {
        !matches!(self, SubjectStatus::Failed)
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ok" => Some(SubjectStatus::Ok),
            "ok-with-flags" => Some(SubjectStatus::OkWithFlags),
            "failed" => Some(SubjectStatus::Failed),
            _ => None,
        }
    }
}

pub fn subject_key_from_parts(board: &str, qualification: &str, subject: &str) -> String {
    [board, qualification, subject]
        .iter()
        .map(|part| part.split_whitespace().collect::<Vec<&str>>().join(" "))
        .filter(|part| !part.is_empty())
        .collect::<Vec<String>>()
        .join("/")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionAudit {
    pub subject_key: String,
    pub action: String,
    pub version: Option<i64>,
    pub node_count: usize,
    pub orphan_count: usize,
    pub validation_result: String,
    pub issues: Vec<String>,
    pub recorded_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractionCounts {
    pub input_line_count: usize,
    pub normalized_line_count: usize,
    pub section_lines_dropped: usize,
    pub header_lines_removed: usize,
    pub footer_lines_removed: usize,
    pub noise_lines_removed: usize,
    pub dehyphenation_merges: usize,
    pub node_count: usize,
    pub orphan_repaired_count: usize,
    pub stitch_truncated_count: usize,
    pub duplicates_collapsed: usize,
    pub loose_line_count: usize,
    pub staging_inserted: usize,
    pub staging_updated: usize,
    pub staging_unchanged: usize,
    pub staging_deleted: usize,
    pub staging_orphaned: usize,
    pub curated_kept: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractionRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub subject_key: String,
    pub source_path: String,
    pub source_sha256: String,
    pub pattern: LayoutPattern,
    pub pattern_confidence: f64,
    pub pattern_forced: bool,
    pub status: SubjectStatus,
    pub started_at: String,
    pub updated_at: String,
    pub counts: ExtractionCounts,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchManifest {
    pub batch_id: String,
    pub subjects: Vec<BatchSubject>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchSubject {
    pub board: String,
    pub qualification: String,
    pub subject: String,
    pub source_path: String,
    #[serde(default)]
    pub pattern: Option<LayoutPattern>,
}

impl BatchSubject {
    pub fn subject_key(&self) -> String {
        subject_key_from_parts(&self.board, &self.qualification, &self.subject)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSubjectResult {
    pub subject_key: String,
    pub status: SubjectStatus,
    pub run_id: Option<String>,
    pub skipped: bool,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchRunManifest {
    pub manifest_version: u32,
    pub batch_id: String,
    pub started_at: String,
    pub updated_at: String,
    pub workers: usize,
    pub subject_count: usize,
    pub ok_count: usize,
    pub ok_with_flags_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
    pub results: Vec<BatchSubjectResult>,
}
