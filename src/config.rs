use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub detector: DetectorConfig,
    pub stitch: StitchConfig,
    pub validation: ValidationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub window_lines: usize,
    pub min_confidence: f64,
    pub min_anchor_matches: usize,
    pub section_headers: Vec<String>,
    pub excluded_sections: Vec<String>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            window_lines: 200,
            min_confidence: 0.15,
            min_anchor_matches: 2,
            section_headers: [
                "introduction",
                "subject content",
                "specification content",
                "content",
                "learning outcomes",
                "guidance",
                "assessment",
                "assessment objectives",
                "scheme of assessment",
                "non-exam assessment",
                "coursework",
                "practical skills",
                "required practical activities",
                "appendix",
                "glossary",
            ]
            .iter()
            .map(|value| value.to_string())
            .collect(),
            excluded_sections: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StitchConfig {
    pub max_lines: usize,
}

impl Default for StitchConfig {
    fn default() -> Self {
        Self { max_lines: 5 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeBand {
    pub min: usize,
    pub max: usize,
}

impl NodeBand {
    pub fn contains(self, count: usize) -> bool {
        count >= self.min && count <= self.max
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub default_node_band: NodeBand,
    pub subject_node_bands: BTreeMap<String, NodeBand>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            default_node_band: NodeBand { min: 1, max: 5000 },
            subject_node_bands: BTreeMap::new(),
        }
    }
}

impl ValidationConfig {
    pub fn band_for(&self, subject_key: &str) -> NodeBand {
        self.subject_node_bands
            .get(subject_key)
            .copied()
            .unwrap_or(self.default_node_band)
    }
}

impl EngineConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let raw =
            fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let config: EngineConfig = serde_json::from_slice(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        config.check()?;

        info!(path = %path.display(), "loaded engine config");
        Ok(config)
    }

    fn check(&self) -> Result<()> {
        if self.stitch.max_lines == 0 {
            bail!("stitch.max_lines must be at least 1");
        }
        if self.detector.window_lines == 0 {
            bail!("detector.window_lines must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.detector.min_confidence) {
            bail!(
                "detector.min_confidence must be within 0.0..=1.0, got {}",
                self.detector.min_confidence
            );
        }
        for (subject_key, band) in std::iter::once(("default", &self.validation.default_node_band))
            .chain(
                self.validation
                    .subject_node_bands
                    .iter()
                    .map(|(key, band)| (key.as_str(), band)),
            )
        {
            if band.min > band.max {
                bail!("node band for {subject_key} has min {} > max {}", band.min, band.max);
            }
        }
        Ok(())
    }
}
