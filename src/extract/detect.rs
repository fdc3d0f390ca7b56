use serde::Serialize;

use super::markers::{LineMarkers, is_table_header_row, normalize_section_label, split_table_cells};
use crate::config::DetectorConfig;
use crate::error::{EngineError, Result};
use crate::model::LayoutPattern;

const TABLE_ROW_WEIGHT: f64 = 1.0;
const TABLE_HEADER_WEIGHT: f64 = 3.0;
const OPTION_ANCHOR_WEIGHT: f64 = 3.0;
const NUMBERED_ANCHOR_WEIGHT: f64 = 2.0;
const BULLET_ANCHOR_WEIGHT: f64 = 1.0;

#[derive(Debug, Clone, Serialize)]
pub struct PatternScore {
    pub pattern: LayoutPattern,
    pub matches: usize,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Detection {
    pub pattern: LayoutPattern,
    pub confidence: f64,
    pub considered_lines: usize,
    pub forced: bool,
    pub scores: Vec<PatternScore>,
}

impl Detection {
    pub fn forced(pattern: LayoutPattern) -> Self {
        Self {
            pattern,
            confidence: 1.0,
            considered_lines: 0,
            forced: true,
            scores: Vec::new(),
        }
    }

    pub fn diagnostic(&self) -> String {
        if self.forced {
            return format!("pattern forced to {}", self.pattern);
        }

        let scores = self
            .scores
            .iter()
            .map(|score| {
                format!(
                    "{}={:.2} ({} anchors)",
                    score.pattern, score.confidence, score.matches
                )
            })
            .collect::<Vec<String>>()
            .join(", ");
        format!("considered {} lines; {}", self.considered_lines, scores)
    }

    pub fn require_recognized(&self, subject_key: &str) -> Result<LayoutPattern> {
        if self.pattern == LayoutPattern::Unknown {
            return Err(EngineError::PatternNotRecognized {
                subject_key: subject_key.to_string(),
                diagnostic: self.diagnostic(),
            });
        }
        Ok(self.pattern)
    }
}

#[derive(Debug, Default)]
struct AnchorCounts {
    table_rows: usize,
    table_headers: usize,
    option: usize,
    numbered: usize,
    bullet: usize,
}

pub fn detect_pattern(
    lines: &[String],
    markers: &LineMarkers,
    config: &DetectorConfig,
) -> Detection {
    let window = lines
        .iter()
        .filter(|line| !line.trim().is_empty())
        .take(config.window_lines)
        .collect::<Vec<&String>>();

    let mut counts = AnchorCounts::default();
    for line in &window {
        if line.contains('|') {
            let cells = split_table_cells(line);
            if cells.len() >= 2 {
                counts.table_rows += 1;
                if is_table_header_row(&cells) {
                    counts.table_headers += 1;
                }
                continue;
            }
        }

        if looks_like_table_header_line(line) {
            counts.table_headers += 1;
        }
        if markers.is_option_anchor(line) {
            counts.option += 1;
        } else if markers.is_numbered_anchor(line) {
            counts.numbered += 1;
        } else if markers.is_bullet(line) {
            counts.bullet += 1;
        }
    }

    let considered = window.len().max(1) as f64;
    let table_matches = if counts.table_rows == 0 {
        0
    } else {
        counts.table_rows + counts.table_headers
    };
    let table_weighted = if counts.table_rows == 0 {
        0.0
    } else {
        counts.table_rows as f64 * TABLE_ROW_WEIGHT
            + counts.table_headers as f64 * TABLE_HEADER_WEIGHT
    };

    let scores = LayoutPattern::CANDIDATES
        .iter()
        .map(|&pattern| {
            let (matches, weighted) = match pattern {
                LayoutPattern::TablePair => (table_matches, table_weighted),
                LayoutPattern::OptionCode => {
                    (counts.option, counts.option as f64 * OPTION_ANCHOR_WEIGHT)
                }
                LayoutPattern::NumberedOutline => {
                    (counts.numbered, counts.numbered as f64 * NUMBERED_ANCHOR_WEIGHT)
                }
                LayoutPattern::BulletList => {
                    (counts.bullet, counts.bullet as f64 * BULLET_ANCHOR_WEIGHT)
                }
                LayoutPattern::Unknown => (0, 0.0),
            };
            PatternScore {
                pattern,
                matches,
                confidence: (weighted / considered).min(1.0),
            }
        })
        .collect::<Vec<PatternScore>>();

    let mut best: Option<&PatternScore> = None;
    for score in &scores {
        if best.is_none_or(|current| score.confidence > current.confidence) {
            best = Some(score);
        }
    }

    let (pattern, confidence) = match best {
        Some(score)
            if score.confidence >= config.min_confidence
                && score.matches >= config.min_anchor_matches =>
        {
            (score.pattern, score.confidence)
        }
        Some(score) => (LayoutPattern::Unknown, score.confidence),
        None => (LayoutPattern::Unknown, 0.0),
    };

    Detection {
        pattern,
        confidence,
        considered_lines: window.len(),
        forced: false,
        scores,
    }
}

fn looks_like_table_header_line(line: &str) -> bool {
    let lower = line.to_lowercase();
    lower.len() <= 80
        && lower.contains("content")
        && ["learning", "guidance", "outcome"]
            .iter()
            .any(|token| lower.contains(token))
}

#[derive(Debug, Clone, Default)]
pub struct SectionFilterOutcome {
    pub lines: Vec<String>,
    pub dropped_lines: usize,
    pub dropped_sections: Vec<String>,
}

/// Drops excluded sections. An excluded section runs from its header line to
/// the next known header that is not itself excluded.
pub fn apply_section_filter(lines: &[String], config: &DetectorConfig) -> SectionFilterOutcome {
    if config.excluded_sections.is_empty() {
        return SectionFilterOutcome {
            lines: lines.to_vec(),
            ..SectionFilterOutcome::default()
        };
    }

    let excluded = config
        .excluded_sections
        .iter()
        .map(|label| normalize_section_label(label))
        .collect::<Vec<String>>();
    let known = config
        .section_headers
        .iter()
        .map(|label| normalize_section_label(label))
        .chain(excluded.iter().cloned())
        .collect::<Vec<String>>();

    let mut outcome = SectionFilterOutcome::default();
    let mut skipping = false;
    for line in lines {
        let label = normalize_section_label(line);
        if !label.is_empty() && known.contains(&label) {
            skipping = excluded.contains(&label);
            if skipping {
                outcome.dropped_sections.push(line.trim().to_string());
            }
        }

        if skipping {
            outcome.dropped_lines += 1;
            continue;
        }
        outcome.lines.push(line.clone());
    }

    outcome
}
