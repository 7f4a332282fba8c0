use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use dosepolicy::config::EngineConfig;
use dosepolicy::table::Method;

#[derive(Parser, Debug)]
#[command(
    name = "dosepolicy",
    version,
    about = "Doubly-robust dose-response artifacts and budget-capped policy recommendations"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Build(BuildArgs),
    Recommend(RecommendArgs),
    Status(StatusArgs),
    Export(ExportArgs),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum PresetName {
    Guardrail,
    Discount,
}

impl PresetName {
    pub fn config(self) -> EngineConfig {
        match self {
            Self::Guardrail => EngineConfig::guardrail(),
            Self::Discount => EngineConfig::discount(),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum MethodArg {
    Naive,
    Dr,
}

impl From<MethodArg> for Method {
    fn from(value: MethodArg) -> Self {
        match value {
            MethodArg::Naive => Method::Naive,
            MethodArg::Dr => Method::Dr,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct BuildArgs {
    #[arg(long, default_value = ".cache/dosepolicy")]
    pub cache_root: PathBuf,

    /// JSON Lines file with one logged unit per line.
    #[arg(long)]
    pub data_path: PathBuf,

    #[arg(long)]
    pub artifact_dir: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = PresetName::Guardrail)]
    pub preset: PresetName,

    /// TOML engine configuration; replaces the preset.
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Defaults to today's UTC date.
    #[arg(long)]
    pub artifact_version: Option<String>,

    #[arg(long, default_value_t = false)]
    pub skip_dr: bool,
}

#[derive(Args, Debug, Clone)]
pub struct RecommendArgs {
    #[arg(long, default_value = ".cache/dosepolicy")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub artifact_dir: Option<PathBuf>,

    #[arg(long)]
    pub objective: String,

    #[arg(long)]
    pub budget_cap: i64,

    #[arg(long, default_value = "none")]
    pub segment_by: String,

    #[arg(long, value_enum, default_value_t = MethodArg::Dr)]
    pub method: MethodArg,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = ".cache/dosepolicy")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub artifact_dir: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ExportArgs {
    #[arg(long, default_value = ".cache/dosepolicy")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub artifact_dir: Option<PathBuf>,

    #[arg(long)]
    pub output_path: Option<PathBuf>,
}

pub fn artifact_dir(cache_root: &std::path::Path, explicit: Option<PathBuf>) -> PathBuf {
    explicit.unwrap_or_else(|| cache_root.join("artifacts"))
}
