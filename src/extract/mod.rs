mod build;
mod detect;
mod markers;
mod normalize;
mod stitch;

#[cfg(test)]
mod tests;

pub use build::{BuildOutput, build_hierarchy};
pub use detect::{Detection, apply_section_filter, detect_pattern};
pub use markers::LineMarkers;
pub use normalize::{NormalizedDocument, TextNormalizer};

use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::model::LayoutPattern;

/// Normalize, filter, detect and build for one subject document. Holds the
/// compiled expressions so batch workers can share one engine.
#[derive(Debug)]
pub struct ExtractionEngine {
    normalizer: TextNormalizer,
    markers: LineMarkers,
    config: EngineConfig,
}

#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    pub document: NormalizedDocument,
    pub section_lines_dropped: usize,
    pub detection: Detection,
    pub build: BuildOutput,
}

impl ExtractionEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        Ok(Self {
            normalizer: TextNormalizer::new()?,
            markers: LineMarkers::new(&config.detector.section_headers)?,
            config,
        })
    }

    pub fn extract(
        &self,
        subject_key: &str,
        raw: &str,
        forced: Option<LayoutPattern>,
    ) -> Result<ExtractionOutcome> {
        let document = self.normalizer.normalize(raw);
        debug!(
            subject_key = %subject_key,
            lines = document.lines.len(),
            pages = document.page_count,
            "normalized source text"
        );

        let filtered = apply_section_filter(&document.lines, &self.config.detector);
        if filtered.dropped_lines > 0 {
            info!(
                subject_key = %subject_key,
                dropped_lines = filtered.dropped_lines,
                sections = ?filtered.dropped_sections,
                "excluded configured sections"
            );
        }

        let detection = match forced {
            Some(pattern) if pattern != LayoutPattern::Unknown => Detection::forced(pattern),
            _ => detect_pattern(&filtered.lines, &self.markers, &self.config.detector),
        };
        let pattern = detection.require_recognized(subject_key)?;
        info!(
            subject_key = %subject_key,
            pattern = %pattern,
            confidence = detection.confidence,
            forced = detection.forced,
            "layout pattern selected"
        );

        let build = build_hierarchy(
            subject_key,
            &filtered.lines,
            pattern,
            &self.markers,
            &self.config.stitch,
        )?;

        Ok(ExtractionOutcome {
            document,
            section_lines_dropped: filtered.dropped_lines,
            detection,
            build,
        })
    }
}
