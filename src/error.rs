use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no layout pattern recognized for {subject_key}: {diagnostic}")]
    PatternNotRecognized {
        subject_key: String,
        diagnostic: String,
    },

    #[error("span anchored at line {line} exceeded the {max_lines}-line stitch cap")]
    StitchBoundsExceeded { line: usize, max_lines: usize },

    #[error("node {code} at line {line} has no eligible parent")]
    OrphanNode { code: String, line: usize },

    #[error("duplicate code {code} at level {level} for {subject_key}")]
    DuplicateCode {
        subject_key: String,
        code: String,
        level: u32,
    },

    #[error("validation failed for {subject_key}: {}", issues.join("; "))]
    ValidationFailed {
        subject_key: String,
        issues: Vec<String>,
    },

    #[error("subject {0} is locked by another operation")]
    SubjectLocked(String),

    #[error("no production generation available to roll back to for {0}")]
    NoRollbackTarget(String),

    #[error("staging node {code} at level {level} not found for {subject_key}")]
    NodeNotFound {
        subject_key: String,
        code: String,
        level: u32,
    },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid marker expression: {0}")]
    Regex(#[from] regex::Error),
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
