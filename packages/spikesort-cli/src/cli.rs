use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "spikesort",
    version,
    about = "Run spike sorting backends on multi-channel recordings",
    long_about = "Run spike sorting backends on multi-channel recordings (ASCII/CSV).\n\
                  Python-hosted backends need an interpreter with the backend installed.\n\
                  Set $SPIKESORT_PYTHON to pick one explicitly."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Command {
    /// Sort a recording with one backend
    Run(RunArgs),
    /// Show interpreter and platform information
    Info(InfoArgs),
    /// List registered sorting backends
    Backends(BackendsArgs),
    /// Show the parameter schema of a backend
    Params(ParamsArgs),
    /// Validate parameters against a backend's schema
    Validate(ValidateArgs),
}

/// Parameter sources shared by `run` and `validate`
#[derive(Args)]
pub struct ParamArgs {
    /// JSON file with parameter overrides
    #[arg(long)]
    pub config: Option<String>,

    /// Single override as key=value (repeatable); values are parsed as JSON
    #[arg(long = "param", value_name = "KEY=VALUE")]
    pub params: Vec<String>,
}

#[derive(Args)]
pub struct RunArgs {
    /// Backend name (see `spikesort backends`)
    #[arg(long)]
    pub backend: String,

    /// Recording file: one row per sample, one column per channel
    #[arg(long)]
    pub recording: String,

    /// Sampling rate in Hz
    #[arg(long)]
    pub sr: f64,

    /// Channel group label per channel, comma separated (e.g. 0,0,1,1)
    #[arg(long, value_delimiter = ',')]
    pub groups: Option<Vec<u32>>,

    #[command(flatten)]
    pub param_args: ParamArgs,

    /// Sort channel groups concurrently
    #[arg(long, default_value_t = false)]
    pub parallel: bool,

    /// Per-group time limit in seconds
    #[arg(long)]
    pub timeout: Option<f64>,

    /// Parent directory for backend working files (default: system temp dir)
    #[arg(long)]
    pub output_folder: Option<String>,

    /// Keep backend working files after the run
    #[arg(long, default_value_t = false)]
    pub keep_output: bool,

    /// Output file (default: stdout)
    #[arg(short, long)]
    pub output: Option<String>,

    /// Compact JSON output (no indentation)
    #[arg(long, default_value_t = false)]
    pub compact: bool,

    /// Suppress progress messages on stderr
    #[arg(long, default_value_t = false)]
    pub quiet: bool,
}

#[derive(Args)]
pub struct InfoArgs {
    /// Python interpreter for Python-hosted backends
    #[arg(long, env = "SPIKESORT_PYTHON")]
    pub python: Option<String>,

    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args)]
pub struct BackendsArgs {
    /// Only list backends that are installed
    #[arg(long, default_value_t = false)]
    pub installed: bool,

    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args)]
pub struct ParamsArgs {
    /// Backend name
    pub backend: String,

    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args)]
pub struct ValidateArgs {
    /// Backend name
    #[arg(long)]
    pub backend: String,

    #[command(flatten)]
    pub param_args: ParamArgs,

    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

/// Parse a "key=value" override. The value is read as JSON when it parses,
/// otherwise taken as a plain string.
pub fn parse_param(s: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("Invalid parameter '{}': expected 'key=value'", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("Invalid parameter '{}': empty key", s));
    }
    let value = value.trim();
    let parsed = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), parsed))
}
