use std::borrow::Cow;
use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, warn};

use super::markers::{LineKind, LineMarkers, is_table_header_row, split_table_cells};
use super::stitch::{Stitched, ends_sentence, stitch_backward, stitch_forward};
use crate::config::StitchConfig;
use crate::error::{EngineError, Result};
use crate::model::{LayoutPattern, NodeFlags, SubjectStatus, TopicNode};
use crate::util::sha256_text;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildIssueKind {
    StitchTruncated,
    OrphanRepaired,
}

/// A recovered anomaly. The node it concerns carries the matching flag.
#[derive(Debug, Clone, Serialize)]
pub struct BuildIssue {
    pub kind: BuildIssueKind,
    pub code: String,
    pub line: usize,
    pub message: String,
}

/// Text that matched no marker and was not absorbed into any title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LooseLine {
    pub line: usize,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub pattern: LayoutPattern,
    pub nodes: Vec<TopicNode>,
    pub issues: Vec<BuildIssue>,
    pub loose_lines: Vec<LooseLine>,
    pub duplicates_collapsed: usize,
}

impl BuildOutput {
    pub fn status(&self) -> SubjectStatus {
        if self.nodes.iter().any(|node| node.flags.any()) {
            SubjectStatus::OkWithFlags
        } else {
            SubjectStatus::Ok
        }
    }

    pub fn orphan_repaired_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|node| node.flags.orphan_repaired)
            .count()
    }

    pub fn stitch_truncated_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|node| node.flags.stitch_truncated)
            .count()
    }
}

/// Ordering matters: a frame closes every open frame that sorts at or after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum FrameKind {
    Key(usize),
    Outcome,
    Letter,
    Bullet(usize),
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    kind: FrameKind,
    node: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attachment {
    Root,
    Child(usize),
    Orphan,
}

#[derive(Debug, Clone, Copy)]
enum NodeCode<'a> {
    Verbatim(&'a str),
    Letter(&'a str),
    Ordinal(&'static str),
}

struct TreeEmitter<'a> {
    subject_key: &'a str,
    pattern: LayoutPattern,
    max_lines: usize,
    nodes: Vec<TopicNode>,
    by_code: HashMap<String, usize>,
    frames: Vec<Frame>,
    section: usize,
    ordinals: HashMap<(Option<usize>, &'static str), u32>,
    bullet_indents: Vec<usize>,
    bullet_glyphs: Vec<char>,
    issues: Vec<BuildIssue>,
    duplicates_collapsed: usize,
}

impl<'a> TreeEmitter<'a> {
    fn new(subject_key: &'a str, pattern: LayoutPattern, max_lines: usize) -> Self {
        Self {
            subject_key,
            pattern,
            max_lines,
            nodes: Vec::new(),
            by_code: HashMap::new(),
            frames: Vec::new(),
            section: 0,
            ordinals: HashMap::new(),
            bullet_indents: Vec::new(),
            bullet_glyphs: Vec::new(),
            issues: Vec::new(),
            duplicates_collapsed: 0,
        }
    }

    /// Depth inside the current bullet run, from indentation or, when the
    /// renderer dropped indentation, from the order glyphs first appear.
    fn bullet_depth(&mut self, glyph: char, indent: usize) -> usize {
        while self
            .bullet_indents
            .last()
            .is_some_and(|&open| open > indent)
        {
            self.bullet_indents.pop();
        }
        if self.bullet_indents.last() != Some(&indent) {
            self.bullet_indents.push(indent);
        }
        let indent_depth = self.bullet_indents.len() - 1;

        let glyph_depth = match self.bullet_glyphs.iter().position(|&seen| seen == glyph) {
            Some(position) => position,
            None => {
                self.bullet_glyphs.push(glyph);
                self.bullet_glyphs.len() - 1
            }
        };

        indent_depth.max(glyph_depth)
    }

    fn reset_bullets(&mut self) {
        self.bullet_indents.clear();
        self.bullet_glyphs.clear();
    }

    fn close_section(&mut self) {
        self.section += 1;
        self.frames.clear();
        self.reset_bullets();
    }

    fn attach(&mut self, kind: FrameKind, code: NodeCode<'_>) -> Attachment {
        match kind {
            FrameKind::Key(depth) => {
                while self
                    .frames
                    .last()
                    .is_some_and(|frame| !matches!(frame.kind, FrameKind::Key(open) if open < depth))
                {
                    self.frames.pop();
                }
                if depth == 0 {
                    return Attachment::Root;
                }
                match (self.frames.last(), code) {
                    (Some(frame), NodeCode::Verbatim(child))
                        if frame.kind == FrameKind::Key(depth - 1)
                            && code_extends(&self.nodes[frame.node].code, child) =>
                    {
                        Attachment::Child(frame.node)
                    }
                    _ => Attachment::Orphan,
                }
            }
            FrameKind::Outcome | FrameKind::Letter => {
                while self.frames.last().is_some_and(|frame| frame.kind >= kind) {
                    self.frames.pop();
                }
                match self.frames.last() {
                    Some(frame) => Attachment::Child(frame.node),
                    None if kind == FrameKind::Outcome
                        || self.pattern == LayoutPattern::BulletList =>
                    {
                        Attachment::Root
                    }
                    None => Attachment::Orphan,
                }
            }
            FrameKind::Bullet(depth) => {
                while self
                    .frames
                    .last()
                    .is_some_and(|frame| matches!(frame.kind, FrameKind::Bullet(open) if open >= depth))
                {
                    self.frames.pop();
                }
                match self.frames.last() {
                    Some(frame) => Attachment::Child(frame.node),
                    None if depth == 0 && self.pattern == LayoutPattern::BulletList => {
                        Attachment::Root
                    }
                    None => Attachment::Orphan,
                }
            }
        }
    }

    fn resolve_code(&mut self, code: NodeCode<'_>, parent: Option<usize>) -> String {
        let local = match code {
            NodeCode::Verbatim(code) => return code.to_string(),
            NodeCode::Letter(letter) => letter.to_string(),
            NodeCode::Ordinal(prefix) => {
                let ordinal = self.ordinals.entry((parent, prefix)).or_insert(0);
                *ordinal += 1;
                format!("{prefix}{ordinal}")
            }
        };

        // Letters restart in every section; a parentless one is qualified by
        // its section so it cannot collapse into an earlier section's item.
        match parent {
            Some(parent) => format!("{}.{}", self.nodes[parent].code, local),
            None if matches!(code, NodeCode::Letter(_)) && self.section > 0 => {
                format!("s{}.{}", self.section, local)
            }
            None => local,
        }
    }

    fn emit(
        &mut self,
        kind: FrameKind,
        code: NodeCode<'_>,
        stitched: &Stitched,
        source_hash: String,
        line: usize,
    ) {
        if !matches!(kind, FrameKind::Bullet(_)) {
            self.reset_bullets();
        }

        let attachment = self.attach(kind, code);
        let (parent, level, orphaned) = match attachment {
            Attachment::Root => (None, 0, false),
            Attachment::Child(parent) => (Some(parent), self.nodes[parent].level + 1, false),
            Attachment::Orphan => (None, 0, true),
        };
        let code = self.resolve_code(code, parent);

        if let Some(&existing) = self.by_code.get(&code) {
            self.duplicates_collapsed += 1;
            let node = &mut self.nodes[existing];
            if stitched.text.chars().count() > node.title.chars().count() {
                debug!(code = %code, line, "longer title replaces collapsed duplicate");
                node.title = stitched.text.clone();
                node.source_hash = source_hash;
                node.flags.stitch_truncated = stitched.truncated;
            } else {
                debug!(code = %code, line, "collapsed duplicate heading");
            }
            self.frames.push(Frame {
                kind,
                node: existing,
            });
            return;
        }

        let flags = NodeFlags {
            orphan_repaired: orphaned,
            stitch_truncated: stitched.truncated,
        };
        if orphaned {
            self.record_issue(
                BuildIssueKind::OrphanRepaired,
                &code,
                line,
                EngineError::OrphanNode {
                    code: code.clone(),
                    line,
                },
            );
        }
        if stitched.truncated {
            self.record_issue(
                BuildIssueKind::StitchTruncated,
                &code,
                line,
                EngineError::StitchBoundsExceeded {
                    line,
                    max_lines: self.max_lines,
                },
            );
        }

        if stitched.fragments.len() > 1 {
            debug!(
                code = %code,
                line,
                fragments = stitched.fragments.len(),
                "stitched multi-line title"
            );
        }

        let order_index = self.nodes.len() as u32;
        let parent_code = parent.map(|parent| self.nodes[parent].code.clone());
        self.nodes.push(TopicNode {
            subject_key: self.subject_key.to_string(),
            code: code.clone(),
            level,
            title: stitched.text.clone(),
            parent_code,
            source_hash,
            order_index,
            flags,
        });
        self.by_code.insert(code, self.nodes.len() - 1);
        self.frames.push(Frame {
            kind,
            node: self.nodes.len() - 1,
        });
    }

    fn record_issue(&mut self, kind: BuildIssueKind, code: &str, line: usize, error: EngineError) {
        warn!(subject_key = %self.subject_key, code = %code, line, "{error}; recovered with audit flag");
        self.issues.push(BuildIssue {
            kind,
            code: code.to_string(),
            line,
            message: error.to_string(),
        });
    }
}

/// `1.2` extends `1`, `1A` extends `1`, `1A.3` extends `1A`; `12` does not
/// extend `1`.
fn code_extends(parent: &str, child: &str) -> bool {
    child
        .strip_prefix(parent)
        .and_then(|rest| rest.chars().next())
        .is_some_and(|next| next == '.' || next.is_ascii_uppercase())
}

/// A right cell under an empty left cell wraps the previous detail only when
/// that detail is unfinished and the new text does not open a sentence.
fn continues_detail(previous: &str, next: &str) -> bool {
    !ends_sentence(previous) && !next.starts_with(|ch: char| ch.is_uppercase())
}

/// Turns `left | right` rows into a line stream the builder already
/// understands. Left cells open a new block; right cells become detail items
/// under it. Rows with an empty left cell either wrap the previous item or
/// start another detail item under the same block.
pub fn flatten_table_rows(lines: &[String], markers: &LineMarkers) -> Vec<String> {
    let mut flattened = Vec::with_capacity(lines.len() * 2);
    let mut open_detail: Option<String> = None;
    for line in lines {
        let cells = if line.contains('|') {
            split_table_cells(line)
        } else {
            Vec::new()
        };
        if cells.len() < 2 {
            flattened.push(line.clone());
            continue;
        }
        if is_table_header_row(&cells) {
            flattened.push(String::new());
            open_detail = None;
            continue;
        }

        let left = cells[0].clone();
        let right = cells[1..]
            .iter()
            .filter(|cell| !cell.is_empty())
            .cloned()
            .collect::<Vec<String>>()
            .join(" ");

        if left.is_empty() {
            if right.is_empty() {
                continue;
            }
            let is_marker = markers.classify(&right, LayoutPattern::TablePair).is_marker();
            let wraps = !is_marker
                && open_detail
                    .as_deref()
                    .is_some_and(|previous| continues_detail(previous, &right));
            if wraps || is_marker {
                flattened.push(right.clone());
            } else {
                flattened.push(format!("• {right}"));
            }
            open_detail = Some(right);
            continue;
        }

        flattened.push(String::new());
        flattened.push(String::new());
        let left_is_marker = markers.classify(&left, LayoutPattern::TablePair).is_marker();
        if left_is_marker
            || right.is_empty()
            || left.ends_with(':')
            || markers.is_section_header(&left)
        {
            flattened.push(left);
        } else {
            flattened.push(format!("{left}:"));
        }

        open_detail = (!right.is_empty()).then(|| right.clone());
        if !right.is_empty() {
            flattened.push(String::new());
            if markers.classify(&right, LayoutPattern::TablePair).is_marker() {
                flattened.push(right);
            } else {
                flattened.push(format!("• {right}"));
            }
        }
    }
    flattened
}

/// A bare code whose title was set one blank line below it.
fn title_follows_blank(kinds: &[LineKind<'_>], index: usize) -> bool {
    matches!(kinds[index], LineKind::CodeOnly { .. })
        && matches!(kinds.get(index + 1), Some(LineKind::Blank))
        && matches!(kinds.get(index + 2), Some(LineKind::Plain { colon: false, .. }))
}

fn clean_body(body: &str) -> &str {
    body.trim().trim_end_matches(':').trim_end()
}

fn span_hash(lines: &[String], stitched: &Stitched) -> String {
    sha256_text(&lines[stitched.start..stitched.end].join("\n"))
}

fn flush_loose(pending: &mut Vec<usize>, lines: &[String], loose: &mut Vec<LooseLine>) {
    for index in pending.drain(..) {
        loose.push(LooseLine {
            line: index + 1,
            text: lines[index].trim().to_string(),
        });
    }
}

/// Single forward pass. Every node's parent is emitted before it; line numbers
/// in issues are 1-based positions in the (flattened) line list.
pub fn build_hierarchy(
    subject_key: &str,
    lines: &[String],
    pattern: LayoutPattern,
    markers: &LineMarkers,
    stitch: &StitchConfig,
) -> Result<BuildOutput> {
    if pattern == LayoutPattern::Unknown {
        return Err(EngineError::PatternNotRecognized {
            subject_key: subject_key.to_string(),
            diagnostic: "hierarchy building needs a recognized layout pattern".to_string(),
        });
    }

    let lines: Cow<'_, [String]> = if pattern == LayoutPattern::TablePair {
        Cow::Owned(flatten_table_rows(lines, markers))
    } else {
        Cow::Borrowed(lines)
    };
    let kinds = lines
        .iter()
        .map(|line| markers.classify(line, pattern))
        .collect::<Vec<LineKind<'_>>>();

    let base_width = kinds
        .iter()
        .filter_map(|kind| match kind {
            LineKind::Key { width, .. } | LineKind::CodeOnly { width, .. } => Some(*width),
            _ => None,
        })
        .min()
        .unwrap_or(1);
    let max_lines = stitch.max_lines.max(1);

    let mut emitter = TreeEmitter::new(subject_key, pattern, max_lines);
    let mut pending = Vec::<usize>::new();
    let mut loose_lines = Vec::<LooseLine>::new();
    let mut floor = 0usize;
    let mut index = 0usize;

    while index < kinds.len() {
        let (kind, code, body) = match kinds[index] {
            LineKind::Blank => {
                index += 1;
                continue;
            }
            LineKind::SectionHeader => {
                flush_loose(&mut pending, &lines, &mut loose_lines);
                emitter.close_section();
                index += 1;
                floor = index;
                continue;
            }
            LineKind::Plain { colon: false, .. } => {
                pending.push(index);
                index += 1;
                continue;
            }
            LineKind::Plain { text, colon: true } => {
                let stitched = stitch_backward(&kinds, index, text, floor, max_lines);
                let absorbed = pending
                    .iter()
                    .position(|&line| line >= stitched.start)
                    .unwrap_or(pending.len());
                pending.truncate(absorbed);
                flush_loose(&mut pending, &lines, &mut loose_lines);

                if stitched.text.is_empty() {
                    pending.push(index);
                    flush_loose(&mut pending, &lines, &mut loose_lines);
                } else {
                    let source_hash = span_hash(&lines, &stitched);
                    emitter.emit(
                        FrameKind::Outcome,
                        NodeCode::Ordinal("lo"),
                        &stitched,
                        source_hash,
                        index + 1,
                    );
                }
                index += 1;
                floor = index;
                continue;
            }
            LineKind::Key { code, body, width } => (
                FrameKind::Key(width.saturating_sub(base_width)),
                NodeCode::Verbatim(code),
                body,
            ),
            LineKind::CodeOnly { code, width } => (
                FrameKind::Key(width.saturating_sub(base_width)),
                NodeCode::Verbatim(code),
                "",
            ),
            LineKind::Letter { letter, body } => (FrameKind::Letter, NodeCode::Letter(letter), body),
            LineKind::Bullet {
                glyph,
                indent,
                body,
            } => (
                FrameKind::Bullet(emitter.bullet_depth(glyph, indent)),
                NodeCode::Ordinal("b"),
                body,
            ),
        };

        flush_loose(&mut pending, &lines, &mut loose_lines);
        let stitched = if title_follows_blank(&kinds, index) {
            let mut stitched = stitch_forward(&kinds, index + 1, "", max_lines);
            stitched.start = index;
            stitched
        } else {
            stitch_forward(&kinds, index, clean_body(body), max_lines)
        };
        if stitched.text.is_empty() {
            pending.push(index);
            flush_loose(&mut pending, &lines, &mut loose_lines);
        } else {
            let source_hash = span_hash(&lines, &stitched);
            emitter.emit(kind, code, &stitched, source_hash, index + 1);
        }
        index = stitched.end;
        floor = index;
    }
    flush_loose(&mut pending, &lines, &mut loose_lines);

    if !loose_lines.is_empty() {
        debug!(
            subject_key = %subject_key,
            loose_lines = loose_lines.len(),
            "lines outside any node span"
        );
    }

    Ok(BuildOutput {
        pattern,
        nodes: emitter.nodes,
        issues: emitter.issues,
        loose_lines,
        duplicates_collapsed: emitter.duplicates_collapsed,
    })
}
