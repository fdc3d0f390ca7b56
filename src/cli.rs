use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use rusqlite::Connection;

use crate::config::EngineConfig;
use crate::model::LayoutPattern;
use crate::store;
use crate::util::ensure_directory;

#[derive(Parser, Debug)]
#[command(
    name = "topicforge",
    version,
    about = "Curriculum specification topic extraction and reconciliation"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Extract(ExtractArgs),
    Batch(BatchArgs),
    Validate(ValidateArgs),
    Promote(PromoteArgs),
    Rollback(RollbackArgs),
    Curate(CurateArgs),
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    #[arg(long, default_value = ".cache/topicforge")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl StoreArgs {
    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.cache_root.join("topicforge.sqlite"))
    }

    pub fn manifest_dir(&self) -> PathBuf {
        self.cache_root.join("manifests")
    }

    pub fn load_config(&self) -> Result<EngineConfig> {
        EngineConfig::load(self.config.as_deref())
    }

    pub fn open_database(&self) -> Result<Connection> {
        let db_path = self.db_path();
        if let Some(parent) = db_path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            ensure_directory(parent)?;
        }
        store::open_database(&db_path)
            .with_context(|| format!("failed to open {}", db_path.display()))
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum PatternArg {
    TablePair,
    NumberedOutline,
    OptionCode,
    BulletList,
}

impl PatternArg {
    pub fn layout(self) -> LayoutPattern {
        match self {
            Self::TablePair => LayoutPattern::TablePair,
            Self::NumberedOutline => LayoutPattern::NumberedOutline,
            Self::OptionCode => LayoutPattern::OptionCode,
            Self::BulletList => LayoutPattern::BulletList,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ExtractArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(long)]
    pub board: String,

    #[arg(long)]
    pub qualification: String,

    #[arg(long)]
    pub subject: String,

    #[arg(long)]
    pub source: PathBuf,

    #[arg(long, value_enum)]
    pub pattern: Option<PatternArg>,

    #[arg(long)]
    pub run_id: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct BatchArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(long)]
    pub batch_manifest: PathBuf,

    #[arg(long, default_value_t = 4)]
    pub workers: usize,

    #[arg(long, default_value_t = false)]
    pub force: bool,

    #[arg(long, default_value_t = 60)]
    pub lock_timeout_secs: u64,
}

#[derive(Args, Debug, Clone)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(long)]
    pub subject_key: String,
}

#[derive(Args, Debug, Clone)]
pub struct PromoteArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(long)]
    pub subject_key: String,

    #[arg(long)]
    pub backup_dir: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct RollbackArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(long)]
    pub subject_key: String,

    #[arg(long)]
    pub to_version: Option<i64>,
}

#[derive(Args, Debug, Clone)]
pub struct CurateArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(long)]
    pub subject_key: String,

    #[arg(long)]
    pub code: String,

    #[arg(long)]
    pub level: u32,

    #[arg(long, default_value_t = false)]
    pub clear: bool,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(long)]
    pub subject_key: Option<String>,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}
