use super::markers::LineKind;

/// A title reassembled from one or more physical lines. `end` is exclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stitched {
    pub text: String,
    pub fragments: Vec<String>,
    pub start: usize,
    pub end: usize,
    pub truncated: bool,
}

pub fn join_fragments(fragments: &[String]) -> String {
    fragments
        .iter()
        .flat_map(|fragment| fragment.split_whitespace())
        .collect::<Vec<&str>>()
        .join(" ")
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<&str>>().join(" ")
}

pub fn ends_sentence(text: &str) -> bool {
    text.trim_end().ends_with(['.', ';', '!', '?'])
}

/// Appends the plain lines that follow an anchor. Stops at a blank line, any
/// marker, a section header, a colon-terminated heading, or the first line of
/// a span that a later colon heading will claim.
pub fn stitch_forward(
    kinds: &[LineKind<'_>],
    anchor: usize,
    anchor_text: &str,
    max_lines: usize,
) -> Stitched {
    let mut fragments = Vec::new();
    let anchor_text = collapse(anchor_text);
    if !anchor_text.is_empty() {
        fragments.push(anchor_text);
    }

    let mut end = anchor + 1;
    let mut truncated = false;
    while let Some(kind) = kinds.get(end) {
        let LineKind::Plain { text, colon: false } = kind else {
            break;
        };
        if starts_backward_span(kinds, end, max_lines) {
            break;
        }
        if end - anchor >= max_lines {
            truncated = true;
            break;
        }

        fragments.push(collapse(text));
        end += 1;
    }

    Stitched {
        text: join_fragments(&fragments),
        fragments,
        start: anchor,
        end,
        truncated,
    }
}

/// Walks back from a colon-terminated anchor, never past `floor`. Single blank
/// lines are crossed; two in a row end the span, as do markers, section
/// headers, another colon heading and a line that closes a sentence.
pub fn stitch_backward(
    kinds: &[LineKind<'_>],
    anchor: usize,
    anchor_text: &str,
    floor: usize,
    max_lines: usize,
) -> Stitched {
    let mut collected = Vec::new();
    let anchor_text = collapse(anchor_text.trim_end().trim_end_matches(':'));

    let mut start = anchor;
    let mut cursor = anchor;
    let mut blank_run = 0usize;
    let mut truncated = false;
    while cursor > floor {
        let previous = cursor - 1;
        match kinds[previous] {
            LineKind::Blank => {
                blank_run += 1;
                if blank_run >= 2 {
                    break;
                }
                cursor = previous;
            }
            LineKind::Plain { text, colon: false } => {
                if ends_sentence(text) {
                    break;
                }
                if collected.len() + 1 >= max_lines {
                    truncated = true;
                    break;
                }
                collected.push(collapse(text));
                start = previous;
                cursor = previous;
                blank_run = 0;
            }
            _ => break,
        }
    }

    collected.reverse();
    if !anchor_text.is_empty() {
        collected.push(anchor_text);
    }

    Stitched {
        text: join_fragments(&collected),
        fragments: collected,
        start,
        end: anchor + 1,
        truncated,
    }
}

/// True when `index` is the first line of a run of plain lines that a colon
/// heading further down would absorb by stitching backward.
pub fn starts_backward_span(kinds: &[LineKind<'_>], index: usize, max_lines: usize) -> bool {
    let mut cursor = index;
    while cursor < kinds.len() && cursor - index < max_lines {
        match kinds[cursor] {
            LineKind::Plain { colon: false, .. } => cursor += 1,
            LineKind::Plain { text, colon: true } => {
                if cursor == index {
                    return false;
                }
                return stitch_backward(kinds, cursor, text, index, max_lines).start == index;
            }
            _ => return false,
        }
    }
    false
}
