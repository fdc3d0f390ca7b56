use super::build::{BuildIssueKind, LooseLine, flatten_table_rows};
use super::markers::{LineKind, normalize_section_label, numbered_code_width, option_code_width};
use super::stitch::{
    ends_sentence, join_fragments, starts_backward_span, stitch_backward, stitch_forward,
};
use super::*;
use crate::config::{DetectorConfig, EngineConfig, StitchConfig};
use crate::error::EngineError;
use crate::model::{LayoutPattern, SubjectStatus, TopicNode};

const SUBJECT: &str = "AQA/A-Level/Biology";

fn owned(lines: &[&str]) -> Vec<String> {
    lines.iter().map(|line| line.to_string()).collect()
}

fn markers() -> LineMarkers {
    LineMarkers::new(&DetectorConfig::default().section_headers).expect("marker expressions compile")
}

fn build(pattern: LayoutPattern, lines: &[&str]) -> BuildOutput {
    build_with_cap(pattern, lines, StitchConfig::default().max_lines)
}

fn build_with_cap(pattern: LayoutPattern, lines: &[&str], max_lines: usize) -> BuildOutput {
    build_hierarchy(
        SUBJECT,
        &owned(lines),
        pattern,
        &markers(),
        &StitchConfig { max_lines },
    )
    .expect("hierarchy builds")
}

fn codes(output: &BuildOutput) -> Vec<&str> {
    output.nodes.iter().map(|node| node.code.as_str()).collect()
}

fn assert_tree_invariant(nodes: &[TopicNode]) {
    for node in nodes {
        match &node.parent_code {
            None => assert_eq!(node.level, 0, "{} has no parent but is not a root", node.code),
            Some(parent) => {
                let parents = nodes
                    .iter()
                    .filter(|candidate| &candidate.code == parent && candidate.level + 1 == node.level)
                    .count();
                assert_eq!(parents, 1, "{} should resolve exactly one parent", node.code);
            }
        }
    }
}

#[test]
fn code_widths_follow_numbering_scheme() {
    assert_eq!(numbered_code_width("1"), 1);
    assert_eq!(numbered_code_width("3.1.4"), 3);
    assert_eq!(option_code_width("1"), 1);
    assert_eq!(option_code_width("1A"), 2);
    assert_eq!(option_code_width("1A.2"), 3);
}

#[test]
fn section_labels_ignore_numbering_and_colon() {
    assert_eq!(normalize_section_label("3. Subject content:"), "subject content");
    assert_eq!(normalize_section_label("  Learning Outcomes "), "learning outcomes");
    assert_eq!(normalize_section_label("1 Cells"), "cells");
}

#[test]
fn classify_distinguishes_marker_kinds() {
    let markers = markers();
    let pattern = LayoutPattern::NumberedOutline;

    assert!(matches!(
        markers.classify("1.2 Transport", pattern),
        LineKind::Key { code: "1.2", body: "Transport", width: 2 }
    ));
    assert!(matches!(
        markers.classify("4.1", pattern),
        LineKind::CodeOnly { code: "4.1", width: 2 }
    ));
    assert!(matches!(
        markers.classify("(b) osmosis", pattern),
        LineKind::Letter { letter: "b", body: "osmosis" }
    ));
    assert!(matches!(
        markers.classify("    ◦ diffusion", pattern),
        LineKind::Bullet { glyph: '◦', indent: 4, body: "diffusion" }
    ));
    assert_eq!(markers.classify("Subject content", pattern), LineKind::SectionHeader);
    assert_eq!(
        markers.classify("Students should know:", pattern),
        LineKind::Plain { text: "Students should know:", colon: true }
    );
    assert_eq!(markers.classify("   ", pattern), LineKind::Blank);
}

#[test]
fn option_codes_only_recognized_under_option_pattern() {
    let markers = markers();
    assert!(matches!(
        markers.classify("1A Atomic structure", LayoutPattern::OptionCode),
        LineKind::Key { code: "1A", width: 2, .. }
    ));
    assert!(matches!(
        markers.classify("1A Atomic structure", LayoutPattern::NumberedOutline),
        LineKind::Plain { .. }
    ));
}

#[test]
fn normalizer_strips_page_chrome_and_merges_hyphenation() {
    let raw = "Biology Spec\n1 Cells\nenter-\nprise skills\nPage 1 of 3\x0c\
               Biology Spec\n1.1 Structure\n2\x0c\
               Biology Spec\n1.2 Transport\n© AQA 2024\n3";

    let document = TextNormalizer::new().expect("normalizer").normalize(raw);
    assert_eq!(
        document.lines,
        owned(&["1 Cells", "enterprise skills", "1.1 Structure", "1.2 Transport"])
    );
    assert_eq!(document.page_count, 3);
    assert_eq!(document.header_lines_removed, 3);
    assert_eq!(document.noise_lines_removed, 4);
    assert_eq!(document.dehyphenation_merges, 1);
}

#[test]
fn normalizer_strips_running_footer_above_page_number() {
    let raw = (1..=4)
        .map(|page| format!("1.{page} Topic {page}\nAQA A-level Biology 7401\n{page}\n"))
        .collect::<Vec<String>>()
        .join("\x0c");

    let document = TextNormalizer::new().expect("normalizer").normalize(&raw);
    assert_eq!(
        document.lines,
        owned(&["1.1 Topic 1", "1.2 Topic 2", "1.3 Topic 3", "1.4 Topic 4"])
    );
    assert_eq!(document.footer_lines_removed, 4);
    assert_eq!(document.noise_lines_removed, 4);
}

#[test]
fn normalizer_keeps_indentation_and_marks_tab_columns() {
    let raw = "\tTopic\t\tContent  here\nfirst\n\n\n\n\nsecond\n\n";

    let document = TextNormalizer::new().expect("normalizer").normalize(raw);
    assert_eq!(
        document.lines,
        owned(&["    Topic | Content here", "first", "", "", "second"])
    );
}

#[test]
fn detector_recognizes_numbered_outline() {
    let lines = owned(&["1 Cells", "1.1 Structure", "1.2 Transport", "Some prose line", "2 Genetics"]);
    let detection = detect_pattern(&lines, &markers(), &DetectorConfig::default());
    assert_eq!(detection.pattern, LayoutPattern::NumberedOutline);
    assert!(!detection.forced);
    assert_eq!(detection.considered_lines, 5);
}

#[test]
fn detector_prefers_option_codes_over_plain_numbers() {
    let lines = owned(&[
        "1 Physical chemistry",
        "1A Atomic structure",
        "1A.1 Fundamental particles",
        "1B Amount of substance",
    ]);
    let detection = detect_pattern(&lines, &markers(), &DetectorConfig::default());
    assert_eq!(detection.pattern, LayoutPattern::OptionCode);
}

#[test]
fn detector_recognizes_table_pairs() {
    let lines = owned(&[
        "Content | Learning outcomes",
        "1.1 Cell structure | Describe the organelles",
        "1.2 Transport | Explain diffusion",
    ]);
    let detection = detect_pattern(&lines, &markers(), &DetectorConfig::default());
    assert_eq!(detection.pattern, LayoutPattern::TablePair);
    let numbered = detection
        .scores
        .iter()
        .find(|score| score.pattern == LayoutPattern::NumberedOutline)
        .expect("numbered score");
    assert_eq!(numbered.matches, 0);
}

#[test]
fn detector_recognizes_bullet_lists() {
    let lines = owned(&["Key ideas", "• one", "• two", "• three"]);
    let detection = detect_pattern(&lines, &markers(), &DetectorConfig::default());
    assert_eq!(detection.pattern, LayoutPattern::BulletList);
}

#[test]
fn detector_rejects_unstructured_prose_with_diagnostic() {
    let lines = owned(&[
        "This document describes the course.",
        "It has no structure at all.",
        "• only one bullet",
    ]);
    let detection = detect_pattern(&lines, &markers(), &DetectorConfig::default());
    assert_eq!(detection.pattern, LayoutPattern::Unknown);

    let error = detection
        .require_recognized(SUBJECT)
        .expect_err("unknown pattern must be rejected");
    match error {
        EngineError::PatternNotRecognized {
            subject_key,
            diagnostic,
        } => {
            assert_eq!(subject_key, SUBJECT);
            assert!(diagnostic.contains("bullet_list=0.33 (1 anchors)"), "{diagnostic}");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn section_filter_drops_excluded_sections_until_next_header() {
    let config = DetectorConfig {
        excluded_sections: vec!["Non-exam assessment".to_string()],
        ..DetectorConfig::default()
    };
    let lines = owned(&[
        "Subject content",
        "1 Cells",
        "Non-exam assessment",
        "1 Coursework task",
        "Assessment objectives",
        "AO1 text",
    ]);

    let outcome = apply_section_filter(&lines, &config);
    assert_eq!(
        outcome.lines,
        owned(&["Subject content", "1 Cells", "Assessment objectives", "AO1 text"])
    );
    assert_eq!(outcome.dropped_lines, 2);
    assert_eq!(outcome.dropped_sections, vec!["Non-exam assessment".to_string()]);
}

#[test]
fn section_filter_is_identity_without_exclusions() {
    let lines = owned(&["Non-exam assessment", "1 Coursework task"]);
    let outcome = apply_section_filter(&lines, &DetectorConfig::default());
    assert_eq!(outcome.lines, lines);
    assert_eq!(outcome.dropped_lines, 0);
}

fn classify_all<'a>(markers: &LineMarkers, lines: &'a [String]) -> Vec<LineKind<'a>> {
    lines
        .iter()
        .map(|line| markers.classify(line, LayoutPattern::NumberedOutline))
        .collect()
}

#[test]
fn join_fragments_normalizes_whitespace() {
    let fragments = owned(&["The role of  business ", " enterprise"]);
    assert_eq!(join_fragments(&fragments), "The role of business enterprise");
    assert!(ends_sentence("done."));
    assert!(ends_sentence("listed;"));
    assert!(!ends_sentence("The role of"));
}

#[test]
fn backward_stitch_crosses_single_blank_and_stops_at_sentence_end() {
    let markers = markers();
    let lines = owned(&[
        "1.2 Markets",
        "Previous sentence ends here.",
        "Students should understand the",
        "",
        "purpose of",
        "marketing:",
    ]);
    let kinds = classify_all(&markers, &lines);

    let stitched = stitch_backward(&kinds, 5, "marketing:", 0, 5);
    assert_eq!(stitched.text, "Students should understand the purpose of marketing");
    assert_eq!(stitched.start, 2);
    assert_eq!(stitched.end, 6);
    assert!(!stitched.truncated);
}

#[test]
fn backward_stitch_stops_at_double_blank_marker_and_second_anchor() {
    let markers = markers();
    let lines = owned(&["Unrelated intro", "", "", "Key ideas:"]);
    let kinds = classify_all(&markers, &lines);
    let stitched = stitch_backward(&kinds, 3, "Key ideas:", 0, 5);
    assert_eq!(stitched.text, "Key ideas");
    assert_eq!(stitched.start, 3);

    let lines = owned(&["Topic one:", "detail text", "Topic two:"]);
    let kinds = classify_all(&markers, &lines);
    let stitched = stitch_backward(&kinds, 2, "Topic two:", 0, 5);
    assert_eq!(stitched.text, "detail text Topic two");
    assert_eq!(stitched.start, 1);

    let lines = owned(&["• bullet", "carry on", "heading:"]);
    let kinds = classify_all(&markers, &lines);
    let stitched = stitch_backward(&kinds, 2, "heading:", 0, 5);
    assert_eq!(stitched.text, "carry on heading");
    assert_eq!(stitched.start, 1);

    let lines = owned(&["4.1", "the practical", "context:"]);
    let kinds = classify_all(&markers, &lines);
    let stitched = stitch_backward(&kinds, 2, "context:", 0, 5);
    assert_eq!(stitched.start, 1);
}

#[test]
fn backward_stitch_respects_floor_and_cap() {
    let markers = markers();
    let lines = owned(&["alpha", "beta", "gamma", "delta", "omega:"]);
    let kinds = classify_all(&markers, &lines);

    let capped = stitch_backward(&kinds, 4, "omega:", 0, 3);
    assert_eq!(capped.text, "gamma delta omega");
    assert_eq!(capped.end - capped.start, 3);
    assert!(capped.truncated);

    let floored = stitch_backward(&kinds, 4, "omega:", 3, 5);
    assert_eq!(floored.text, "delta omega");
    assert!(!floored.truncated);
}

#[test]
fn forward_stitch_stops_where_backward_span_begins() {
    let markers = markers();
    let lines = owned(&["1 Business activity", "The role of business", "enterprise:"]);
    let kinds = classify_all(&markers, &lines);

    assert!(starts_backward_span(&kinds, 1, 5));
    let stitched = stitch_forward(&kinds, 0, "Business activity", 5);
    assert_eq!(stitched.text, "Business activity");
    assert_eq!(stitched.end, 1);
}

#[test]
fn stitched_title_is_never_shorter_than_a_fragment() {
    let markers = markers();
    let lines = owned(&[
        "1.1 Cell structure and the",
        "function of organelles in eukaryotic",
        "and prokaryotic cells",
        "The role of business",
        "",
        "enterprise in the wider economy:",
        "a) a very long lettered item body that is longer than everything else",
    ]);
    let kinds = classify_all(&markers, &lines);

    let cases = [
        stitch_forward(&kinds, 0, "Cell structure and the", 5),
        stitch_forward(&kinds, 0, "Cell structure and the", 2),
        stitch_backward(&kinds, 5, "enterprise in the wider economy:", 0, 5),
        stitch_backward(&kinds, 5, "enterprise in the wider economy:", 0, 1),
        stitch_forward(
            &kinds,
            6,
            "a very long lettered item body that is longer than everything else",
            5,
        ),
    ];
    for stitched in cases {
        for fragment in &stitched.fragments {
            assert!(
                stitched.text.len() >= fragment.len(),
                "{:?} shorter than {:?}",
                stitched.text,
                fragment
            );
        }
    }
}

#[test]
fn scenario_table_pair_lines_build_four_levels() {
    let output = build(
        LayoutPattern::TablePair,
        &["1.1 Cell structure", "1.1.1 Organelles", "a) mitochondria", "o powerhouse of the cell"],
    );

    assert_eq!(codes(&output), vec!["1.1", "1.1.1", "1.1.1.a", "1.1.1.a.b1"]);
    let levels = output.nodes.iter().map(|node| node.level).collect::<Vec<u32>>();
    assert_eq!(levels, vec![0, 1, 2, 3]);
    let titles = output
        .nodes
        .iter()
        .map(|node| node.title.as_str())
        .collect::<Vec<&str>>();
    assert_eq!(
        titles,
        vec!["Cell structure", "Organelles", "mitochondria", "powerhouse of the cell"]
    );
    assert_eq!(output.nodes[3].parent_code.as_deref(), Some("1.1.1.a"));
    assert_eq!(output.status(), SubjectStatus::Ok);
    assert_tree_invariant(&output.nodes);
}

#[test]
fn scenario_colon_heading_is_stitched_backward() {
    let output = build(
        LayoutPattern::BulletList,
        &["The role of business", "enterprise:", "• creating ideas", "• taking risks"],
    );

    assert_eq!(codes(&output), vec!["lo1", "lo1.b1", "lo1.b2"]);
    assert_eq!(output.nodes[0].title, "The role of business enterprise");
    assert_eq!(output.nodes[1].parent_code.as_deref(), Some("lo1"));
    assert!(output.loose_lines.is_empty());
}

#[test]
fn colon_heading_nests_under_numbered_heading() {
    let output = build(
        LayoutPattern::NumberedOutline,
        &["1 Business activity", "The role of business", "enterprise:", "• creating ideas"],
    );

    assert_eq!(codes(&output), vec!["1", "1.lo1", "1.lo1.b1"]);
    assert_eq!(output.nodes[0].title, "Business activity");
    assert_eq!(output.nodes[1].title, "The role of business enterprise");
    assert_eq!(output.nodes[2].level, 2);
    assert_tree_invariant(&output.nodes);
}

#[test]
fn forward_stitch_joins_wrapped_heading() {
    let output = build(
        LayoutPattern::NumberedOutline,
        &["1.1 Cell structure and the", "function of organelles", "1.2 Transport"],
    );

    assert_eq!(codes(&output), vec!["1.1", "1.2"]);
    assert_eq!(output.nodes[0].title, "Cell structure and the function of organelles");
    assert_eq!(output.nodes[1].level, 0);
}

#[test]
fn capped_stitch_flags_node_and_reports_loose_remainder() {
    let output = build_with_cap(
        LayoutPattern::NumberedOutline,
        &["1 Heading", "line two", "line three", "2 Next"],
        2,
    );

    assert_eq!(codes(&output), vec!["1", "2"]);
    assert_eq!(output.nodes[0].title, "Heading line two");
    assert!(output.nodes[0].flags.stitch_truncated);
    assert_eq!(output.stitch_truncated_count(), 1);
    assert_eq!(output.issues.len(), 1);
    assert_eq!(output.issues[0].kind, BuildIssueKind::StitchTruncated);
    assert!(output.issues[0].message.contains("2-line stitch cap"));
    assert_eq!(
        output.loose_lines,
        vec![LooseLine {
            line: 3,
            text: "line three".to_string(),
        }]
    );
    assert_eq!(output.status(), SubjectStatus::OkWithFlags);
}

#[test]
fn building_twice_yields_identical_nodes() {
    let lines = [
        "1 Cells",
        "1.1 Structure of",
        "eukaryotic cells",
        "a) organelles",
        "• nucleus",
        "• ribosomes",
        "Students should be able",
        "to describe:",
        "• diffusion",
        "2 Genetics",
    ];
    let first = build(LayoutPattern::NumberedOutline, &lines);
    let second = build(LayoutPattern::NumberedOutline, &lines);
    assert_eq!(first.nodes, second.nodes);
    assert_tree_invariant(&first.nodes);
}

#[test]
fn skipped_parent_level_is_repaired_as_orphan() {
    let output = build(
        LayoutPattern::NumberedOutline,
        &["1 Cells", "1.1 Structure", "2.1.3 Stray heading"],
    );

    let stray = &output.nodes[2];
    assert_eq!(stray.code, "2.1.3");
    assert_eq!(stray.level, 0);
    assert_eq!(stray.parent_code, None);
    assert!(stray.flags.orphan_repaired);
    assert_eq!(output.orphan_repaired_count(), 1);
    assert_eq!(output.issues[0].kind, BuildIssueKind::OrphanRepaired);
    assert_eq!(output.status(), SubjectStatus::OkWithFlags);
    assert_tree_invariant(&output.nodes);
}

#[test]
fn letter_without_heading_is_orphan_outside_bullet_lists() {
    let output = build(LayoutPattern::NumberedOutline, &["a) stray item", "1 Cells"]);
    assert_eq!(codes(&output), vec!["a", "1"]);
    assert!(output.nodes[0].flags.orphan_repaired);

    let output = build(LayoutPattern::BulletList, &["a) first item", "b) second item"]);
    assert!(output.nodes.iter().all(|node| !node.flags.orphan_repaired));
}

#[test]
fn lettered_items_in_separate_sections_stay_distinct() {
    let output = build(
        LayoutPattern::NumberedOutline,
        &["a) first section item", "", "Assessment", "a) second section item that is different"],
    );

    assert_eq!(codes(&output), vec!["a", "s1.a"]);
    assert_eq!(output.duplicates_collapsed, 0);
    assert_eq!(output.nodes[0].title, "first section item");
    assert_eq!(output.nodes[1].title, "second section item that is different");
    assert_tree_invariant(&output.nodes);
}

#[test]
fn code_only_heading_takes_title_across_one_blank_line() {
    let output = build(
        LayoutPattern::NumberedOutline,
        &["1", "", "Biological molecules", "1.1 Monomers and polymers", "1.2 Carbohydrates"],
    );

    assert_eq!(codes(&output), vec!["1", "1.1", "1.2"]);
    assert_eq!(output.nodes[0].title, "Biological molecules");
    assert!(output.nodes.iter().all(|node| !node.flags.orphan_repaired));
    assert!(output.loose_lines.is_empty());
    assert_tree_invariant(&output.nodes);
}

#[test]
fn repeated_headings_collapse_and_keep_longer_title() {
    let output = build(
        LayoutPattern::NumberedOutline,
        &["1 Cells", "1.1 Structure", "1 Cells", "1.1 Structure and function of cells"],
    );

    assert_eq!(codes(&output), vec!["1", "1.1"]);
    assert_eq!(output.duplicates_collapsed, 2);
    assert_eq!(output.nodes[1].title, "Structure and function of cells");
    assert_eq!(output.nodes[1].parent_code.as_deref(), Some("1"));

    let output = build(LayoutPattern::NumberedOutline, &["1 Cells and tissues", "1 Cells"]);
    assert_eq!(output.nodes.len(), 1);
    assert_eq!(output.nodes[0].title, "Cells and tissues");
}

#[test]
fn bullets_nest_by_indentation() {
    let output = build(
        LayoutPattern::BulletList,
        &["• Energy", "    • Kinetic", "    • Potential", "• Forces"],
    );

    assert_eq!(codes(&output), vec!["b1", "b1.b1", "b1.b2", "b2"]);
    let levels = output.nodes.iter().map(|node| node.level).collect::<Vec<u32>>();
    assert_eq!(levels, vec![0, 1, 1, 0]);
}

#[test]
fn bullets_nest_by_glyph_when_indentation_is_lost() {
    let output = build(
        LayoutPattern::BulletList,
        &["• Energy", "o Kinetic", "o Potential", "• Forces"],
    );

    assert_eq!(codes(&output), vec!["b1", "b1.b1", "b1.b2", "b2"]);
}

#[test]
fn option_codes_derive_levels_from_code_width() {
    let output = build(
        LayoutPattern::OptionCode,
        &[
            "1 Physical chemistry",
            "1A Atomic structure",
            "1A.1 Fundamental particles",
            "1B Amount of substance",
        ],
    );

    assert_eq!(codes(&output), vec!["1", "1A", "1A.1", "1B"]);
    let levels = output.nodes.iter().map(|node| node.level).collect::<Vec<u32>>();
    assert_eq!(levels, vec![0, 1, 2, 1]);
    assert_eq!(output.nodes[3].parent_code.as_deref(), Some("1"));
    assert_tree_invariant(&output.nodes);
}

#[test]
fn table_rows_flatten_into_blocks() {
    let lines = owned(&[
        "| Content | Learning outcomes |",
        "| 1.1 Cell structure | Describe organelles |",
        "| | and their roles |",
    ]);
    let flattened = flatten_table_rows(&lines, &markers());
    assert_eq!(
        flattened,
        owned(&["", "", "", "1.1 Cell structure", "", "• Describe organelles", "and their roles"])
    );
}

#[test]
fn table_pair_rows_attach_details_to_left_column_key() {
    let output = build(
        LayoutPattern::TablePair,
        &[
            "| Content | Learning outcomes |",
            "| 1.1 Cell structure | Describe organelles |",
            "| | and their roles |",
            "| | a) explain their function |",
            "| 1.2 Transport | Diffusion and osmosis |",
        ],
    );

    assert_eq!(codes(&output), vec!["1.1", "1.1.b1", "1.1.a", "1.2", "1.2.b1"]);
    assert_eq!(output.nodes[1].title, "Describe organelles and their roles");
    assert_eq!(output.nodes[2].level, 1);
    assert_eq!(output.nodes[4].parent_code.as_deref(), Some("1.2"));
    assert_tree_invariant(&output.nodes);
}

#[test]
fn table_continuation_sentences_become_separate_details() {
    let output = build(
        LayoutPattern::TablePair,
        &[
            "| 1.1 Cells | Describe the nucleus. |",
            "| | Describe the ribosome. |",
            "| | Describe the mitochondria. |",
            "| | Describe the chloroplast. |",
            "| | Describe the vacuole. |",
            "| | Describe the cell wall. |",
            "| | Describe the membrane |",
            "| | and its proteins. |",
        ],
    );

    assert_eq!(
        codes(&output),
        vec![
            "1.1", "1.1.b1", "1.1.b2", "1.1.b3", "1.1.b4", "1.1.b5", "1.1.b6", "1.1.b7"
        ]
    );
    assert_eq!(output.nodes[6].title, "Describe the cell wall.");
    assert_eq!(output.nodes[7].title, "Describe the membrane and its proteins.");
    assert_eq!(output.stitch_truncated_count(), 0);
    assert!(output.loose_lines.is_empty());
    assert_tree_invariant(&output.nodes);
}

#[test]
fn unnumbered_left_cell_becomes_heading() {
    let output = build(
        LayoutPattern::TablePair,
        &["| Cell biology | Describe cells |", "| Genetics | Explain inheritance |"],
    );

    assert_eq!(codes(&output), vec!["lo1", "lo1.b1", "lo2", "lo2.b1"]);
    assert_eq!(output.nodes[0].title, "Cell biology");
}

#[test]
fn source_hash_tracks_span_content() {
    let first = build(LayoutPattern::NumberedOutline, &["1 Cells", "2 Genetics"]);
    let second = build(LayoutPattern::NumberedOutline, &["1 Cells", "2 Genetics and evolution"]);
    assert_eq!(first.nodes[0].source_hash, second.nodes[0].source_hash);
    assert_ne!(first.nodes[1].source_hash, second.nodes[1].source_hash);
}

#[test]
fn builder_refuses_unknown_pattern() {
    let result = build_hierarchy(
        SUBJECT,
        &owned(&["1 Cells"]),
        LayoutPattern::Unknown,
        &markers(),
        &StitchConfig::default(),
    );
    assert!(matches!(result, Err(EngineError::PatternNotRecognized { .. })));
}

#[test]
fn engine_rejects_unrecognized_document_before_building() {
    let engine = ExtractionEngine::new(EngineConfig::default()).expect("engine");
    let raw = "This specification is written as prose.\nIt has no headings.\nNothing to anchor on.\n";

    let result = engine.extract("Edexcel/GCSE/Art", raw, None);
    assert!(matches!(result, Err(EngineError::PatternNotRecognized { .. })));
}

#[test]
fn engine_runs_full_pipeline() {
    let engine = ExtractionEngine::new(EngineConfig::default()).expect("engine");
    let raw = "1 Cells\n1.1 Structure\n1.2 Transport\n\x0c2 Genetics\n";

    let outcome = engine.extract(SUBJECT, raw, None).expect("extract");
    assert_eq!(outcome.detection.pattern, LayoutPattern::NumberedOutline);
    assert_eq!(outcome.build.nodes.len(), 4);
    assert_eq!(outcome.build.status(), SubjectStatus::Ok);
    assert_eq!(outcome.document.page_count, 2);
}

#[test]
fn engine_honours_forced_pattern() {
    let engine = ExtractionEngine::new(EngineConfig::default()).expect("engine");

    let outcome = engine
        .extract(SUBJECT, "• only bullet", Some(LayoutPattern::BulletList))
        .expect("forced pattern skips detection");
    assert!(outcome.detection.forced);
    assert_eq!(outcome.build.nodes.len(), 1);
    assert_eq!(outcome.build.nodes[0].code, "b1");
}
