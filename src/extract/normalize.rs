use std::collections::{HashMap, HashSet};

use regex::Regex;

use crate::error::Result;

#[derive(Debug, Clone, Default)]
pub struct NormalizedDocument {
    pub lines: Vec<String>,
    pub page_count: usize,
    pub input_line_count: usize,
    pub header_lines_removed: usize,
    pub footer_lines_removed: usize,
    pub noise_lines_removed: usize,
    pub dehyphenation_merges: usize,
}

#[derive(Debug)]
pub struct TextNormalizer {
    page_marker: Regex,
    page_number: Regex,
    boilerplate: Regex,
}

impl TextNormalizer {
    pub fn new() -> Result<Self> {
        Ok(Self {
            page_marker: Regex::new(r"(?i)^page\s+\d{1,4}(?:\s+of\s+\d{1,4})?$")?,
            page_number: Regex::new(r"^\d{1,4}$")?,
            boilerplate: Regex::new(
                r"(?i)^(?:©|\(c\)\s|copyright\b)|visit\s+(?:our\s+website|www\.)",
            )?,
        })
    }

    /// Pages are separated by form feeds, as `pdftotext` emits them.
    pub fn normalize(&self, raw: &str) -> NormalizedDocument {
        let mut document = NormalizedDocument {
            input_line_count: raw.lines().count(),
            ..NormalizedDocument::default()
        };

        let mut pages = raw
            .split('\x0c')
            .map(|page| page.lines().map(clean_line).collect::<Vec<String>>())
            .collect::<Vec<Vec<String>>>();
        document.page_count = pages.len();

        for page in &mut pages {
            let before = page.len();
            page.retain(|line| !self.line_is_noise(line));
            document.noise_lines_removed += before - page.len();

            if let Some(index) = last_nonempty_line_index(page) {
                if self.page_number.is_match(page[index].trim()) {
                    page.remove(index);
                    document.noise_lines_removed += 1;
                }
            }
            if let Some(index) = first_nonempty_line_index(page) {
                if self.page_number.is_match(page[index].trim()) {
                    page.remove(index);
                    document.noise_lines_removed += 1;
                }
            }
        }

        // Running headers and footers sit next to the page number, so they
        // are only visible at the page edge once page chrome is gone.
        let header_candidates = detect_repeated_edge_lines(&pages, true);
        let footer_candidates = detect_repeated_edge_lines(&pages, false);

        for page in &mut pages {
            if let Some(index) = first_nonempty_line_index(page) {
                let candidate = normalize_edge_line(&page[index]);
                if !candidate.is_empty() && header_candidates.contains(&candidate) {
                    page.remove(index);
                    document.header_lines_removed += 1;
                }
            }
            if let Some(index) = last_nonempty_line_index(page) {
                let candidate = normalize_edge_line(&page[index]);
                if !candidate.is_empty() && footer_candidates.contains(&candidate) {
                    page.remove(index);
                    document.footer_lines_removed += 1;
                }
            }

            let (merged, merges) = merge_hyphenated_lines(std::mem::take(page));
            *page = merged;
            document.dehyphenation_merges += merges;
        }

        let mut blank_run = 0usize;
        for line in pages.into_iter().flatten() {
            if line.trim().is_empty() {
                blank_run += 1;
                if blank_run <= 2 {
                    document.lines.push(String::new());
                }
                continue;
            }
            blank_run = 0;
            document.lines.push(line);
        }

        while document.lines.last().is_some_and(|line| line.is_empty()) {
            document.lines.pop();
        }
        let leading_blanks = document
            .lines
            .iter()
            .take_while(|line| line.is_empty())
            .count();
        document.lines.drain(..leading_blanks);

        document
    }

    fn line_is_noise(&self, line: &str) -> bool {
        let trimmed = line.trim();
        !trimmed.is_empty()
            && (self.page_marker.is_match(trimmed) || self.boilerplate.is_match(trimmed))
    }
}

/// Leading tabs become indentation; interior tabs are column breaks and turn
/// into ` | ` so table rows look the same whatever the source renderer was.
fn clean_line(raw: &str) -> String {
    let raw = raw.replace('\u{00a0}', " ").replace('\r', "");
    let body = raw.trim_start_matches([' ', '\t']);
    let indent = raw[..raw.len() - body.len()]
        .chars()
        .map(|ch| if ch == '\t' { 4 } else { 1 })
        .sum::<usize>();

    let cells = body
        .split('\t')
        .map(|cell| cell.split_whitespace().collect::<Vec<&str>>().join(" "))
        .filter(|cell| !cell.is_empty())
        .collect::<Vec<String>>();
    if cells.is_empty() {
        return String::new();
    }

    format!("{}{}", " ".repeat(indent), cells.join(" | "))
}

fn detect_repeated_edge_lines(pages: &[Vec<String>], header: bool) -> HashSet<String> {
    let mut counts = HashMap::<String, usize>::new();
    for page in pages {
        let candidate = if header {
            page.iter().map(|line| line.trim()).find(|line| !line.is_empty())
        } else {
            page.iter()
                .rev()
                .map(|line| line.trim())
                .find(|line| !line.is_empty())
        };

        let Some(candidate) = candidate else {
            continue;
        };

        let normalized = normalize_edge_line(candidate);
        if normalized.is_empty() || normalized.len() > 120 {
            continue;
        }
        *counts.entry(normalized).or_insert(0) += 1;
    }

    counts
        .into_iter()
        .filter_map(|(candidate, count)| if count >= 3 { Some(candidate) } else { None })
        .collect()
}

fn normalize_edge_line(input: &str) -> String {
    input
        .split_whitespace()
        .collect::<Vec<&str>>()
        .join(" ")
        .to_lowercase()
}

fn first_nonempty_line_index(lines: &[String]) -> Option<usize> {
    lines.iter().position(|line| !line.trim().is_empty())
}

fn last_nonempty_line_index(lines: &[String]) -> Option<usize> {
    lines.iter().rposition(|line| !line.trim().is_empty())
}

fn merge_hyphenated_lines(lines: Vec<String>) -> (Vec<String>, usize) {
    let mut merged = Vec::<String>::with_capacity(lines.len());
    let mut merges = 0usize;
    let mut index = 0usize;

    while index < lines.len() {
        let current = &lines[index];
        if let Some(next) = lines.get(index + 1) {
            if should_merge_hyphenated_pair(current, next) {
                merged.push(format!(
                    "{}{}",
                    current.trim_end().trim_end_matches('-'),
                    next.trim_start()
                ));
                merges += 1;
                index += 2;
                continue;
            }
        }

        merged.push(current.clone());
        index += 1;
    }

    (merged, merges)
}

fn should_merge_hyphenated_pair(current: &str, next: &str) -> bool {
    let left = current.trim_end();
    if !left.ends_with('-') || left.contains(" | ") {
        return false;
    }

    let starts_with_lowercase = next
        .trim_start()
        .chars()
        .next()
        .map(|character| character.is_lowercase())
        .unwrap_or(false);
    if !starts_with_lowercase {
        return false;
    }

    left.trim_end_matches('-')
        .chars()
        .last()
        .map(|character| character.is_alphabetic())
        .unwrap_or(false)
}
