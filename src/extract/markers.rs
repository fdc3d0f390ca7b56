use regex::Regex;

use crate::error::Result;
use crate::model::LayoutPattern;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind<'a> {
    Blank,
    SectionHeader,
    Key {
        code: &'a str,
        body: &'a str,
        width: usize,
    },
    CodeOnly {
        code: &'a str,
        width: usize,
    },
    Letter {
        letter: &'a str,
        body: &'a str,
    },
    Bullet {
        glyph: char,
        indent: usize,
        body: &'a str,
    },
    Plain {
        text: &'a str,
        colon: bool,
    },
}

impl LineKind<'_> {
    pub fn is_marker(&self) -> bool {
        matches!(
            self,
            LineKind::Key { .. }
                | LineKind::CodeOnly { .. }
                | LineKind::Letter { .. }
                | LineKind::Bullet { .. }
        )
    }
}

/// Compiled anchor expressions shared by the detector, stitcher and builder.
#[derive(Debug)]
pub struct LineMarkers {
    numbered_heading: Regex,
    numbered_code_only: Regex,
    option_heading: Regex,
    option_code_only: Regex,
    lettered_item: Regex,
    bullet_item: Regex,
    section_headers: Vec<String>,
}

impl LineMarkers {
    pub fn new(section_headers: &[String]) -> Result<Self> {
        Ok(Self {
            numbered_heading: Regex::new(
                r"^(?P<code>\d{1,3}(?:\.\d{1,3})*)\.?\s+(?P<body>\S.*)$",
            )?,
            numbered_code_only: Regex::new(r"^(?P<code>\d{1,3}(?:\.\d{1,3})*)\.?$")?,
            option_heading: Regex::new(
                r"^(?P<code>\d{1,3}[A-Z](?:\.\d{1,3})*)\b[.:)]?\s+(?P<body>\S.*)$",
            )?,
            option_code_only: Regex::new(r"^(?P<code>\d{1,3}[A-Z](?:\.\d{1,3})*)[.:]?$")?,
            lettered_item: Regex::new(
                r"^(?:\((?P<wrapped>[a-z]|[ivx]{2,4})\)|(?P<bare>[a-z]|[ivx]{2,4})[.)])\s+(?P<body>\S.*)$",
            )?,
            bullet_item: Regex::new(
                r"^(?P<indent> *)(?P<glyph>[•●▪■◦○·o*\-–—])\s+(?P<body>\S.*)$",
            )?,
            section_headers: section_headers
                .iter()
                .map(|header| normalize_section_label(header))
                .filter(|header| !header.is_empty())
                .collect(),
        })
    }

    pub fn classify<'a>(&self, line: &'a str, pattern: LayoutPattern) -> LineKind<'a> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return LineKind::Blank;
        }

        if pattern == LayoutPattern::OptionCode {
            if let Some(captures) = self.option_heading.captures(trimmed) {
                if let (Some(code), Some(body)) = (captures.name("code"), captures.name("body")) {
                    return LineKind::Key {
                        code: code.as_str(),
                        body: body.as_str(),
                        width: option_code_width(code.as_str()),
                    };
                }
            }
            if let Some(code) = self
                .option_code_only
                .captures(trimmed)
                .and_then(|captures| captures.name("code"))
            {
                return LineKind::CodeOnly {
                    code: code.as_str(),
                    width: option_code_width(code.as_str()),
                };
            }
        }

        if let Some(captures) = self.numbered_heading.captures(trimmed) {
            if let (Some(code), Some(body)) = (captures.name("code"), captures.name("body")) {
                return LineKind::Key {
                    code: code.as_str(),
                    body: body.as_str(),
                    width: numbered_code_width(code.as_str()),
                };
            }
        }

        if let Some(code) = self
            .numbered_code_only
            .captures(trimmed)
            .and_then(|captures| captures.name("code"))
        {
            return LineKind::CodeOnly {
                code: code.as_str(),
                width: numbered_code_width(code.as_str()),
            };
        }

        if let Some(captures) = self.lettered_item.captures(trimmed) {
            let letter = captures.name("wrapped").or_else(|| captures.name("bare"));
            if let (Some(letter), Some(body)) = (letter, captures.name("body")) {
                return LineKind::Letter {
                    letter: letter.as_str(),
                    body: body.as_str(),
                };
            }
        }

        if let Some(captures) = self.bullet_item.captures(line.trim_end()) {
            let glyph = captures
                .name("glyph")
                .and_then(|value| value.as_str().chars().next());
            if let (Some(glyph), Some(body)) = (glyph, captures.name("body")) {
                return LineKind::Bullet {
                    glyph,
                    indent: captures.name("indent").map(|value| value.len()).unwrap_or(0),
                    body: body.as_str(),
                };
            }
        }

        if self.is_section_header(trimmed) {
            return LineKind::SectionHeader;
        }

        LineKind::Plain {
            text: trimmed,
            colon: trimmed.ends_with(':'),
        }
    }

    pub fn is_section_header(&self, line: &str) -> bool {
        let label = normalize_section_label(line);
        !label.is_empty() && self.section_headers.iter().any(|header| *header == label)
    }

    pub fn is_numbered_anchor(&self, line: &str) -> bool {
        let trimmed = line.trim();
        self.numbered_heading.is_match(trimmed) || self.numbered_code_only.is_match(trimmed)
    }

    pub fn is_option_anchor(&self, line: &str) -> bool {
        let trimmed = line.trim();
        self.option_heading.is_match(trimmed) || self.option_code_only.is_match(trimmed)
    }

    pub fn is_bullet(&self, line: &str) -> bool {
        self.bullet_item.is_match(line.trim_end())
    }
}

pub fn numbered_code_width(code: &str) -> usize {
    code.split('.').count()
}

/// `1` is one wide, `1A` two, and each dotted suffix adds one.
pub fn option_code_width(code: &str) -> usize {
    let mut segments = code.split('.');
    let head = segments.next().unwrap_or_default();
    let head_width = if head.chars().any(|ch| ch.is_ascii_uppercase()) {
        2
    } else {
        1
    };
    head_width + segments.count()
}

pub fn normalize_section_label(line: &str) -> String {
    let mut tokens = line.split_whitespace().peekable();
    if tokens
        .peek()
        .map(|token| {
            token
                .trim_end_matches('.')
                .chars()
                .all(|ch| ch.is_ascii_digit() || ch == '.')
        })
        .unwrap_or(false)
    {
        tokens.next();
    }

    tokens
        .collect::<Vec<&str>>()
        .join(" ")
        .trim_end_matches(':')
        .trim()
        .to_lowercase()
}

pub fn split_table_cells(line: &str) -> Vec<String> {
    let trimmed = line.trim();
    let inner = trimmed.strip_prefix('|').unwrap_or(trimmed);
    let inner = inner.strip_suffix('|').unwrap_or(inner);

    inner
        .split('|')
        .map(|cell| cell.split_whitespace().collect::<Vec<&str>>().join(" "))
        .collect()
}

const TABLE_HEADER_TOKENS: [&str; 9] = [
    "content",
    "learning",
    "outcome",
    "guidance",
    "topic",
    "amplification",
    "notes",
    "specification",
    "depth",
];

pub fn is_table_header_row(cells: &[String]) -> bool {
    let populated = cells
        .iter()
        .filter(|cell| !cell.is_empty())
        .collect::<Vec<&String>>();
    if populated.is_empty() {
        return false;
    }

    populated.iter().all(|cell| {
        let lower = cell.to_lowercase();
        cell.split_whitespace().count() <= 4
            && !cell.starts_with(|ch: char| ch.is_ascii_digit())
            && TABLE_HEADER_TOKENS.iter().any(|token| lower.contains(token))
    })
}
