//! Run configuration: merges file defaults, environment overrides, and
//! per-invocation CLI flags into one immutable [`RunConfig`].
//!
//! Resolution priority (highest wins): CLI flag > environment variable >
//! built-in default. There is no config *file* format of its own; the
//! built-in defaults below stand in for one, and an operator can externalize
//! them via a shell wrapper or `.env` file that sets the environment
//! variables this module reads.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;

use crate::error::{Error, Result};

/// Mediation mode: whether a block/deny verdict is actually honored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Block-capable hooks can produce `block`/`deny` decisions.
    Enforce,
    /// Verdicts are recorded but never change the decision sent to the host.
    Observe,
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "enforce" => Ok(Mode::Enforce),
            "observe" => Ok(Mode::Observe),
            other => Err(format!("unknown mode: {other}")),
        }
    }
}

/// Per-invocation CLI overrides. Every field is optional; an absent field
/// falls through to the environment, then to the built-in default.
#[derive(Parser, Debug, Default)]
#[command(name = "hookguard", about = "Hook event mediation engine")]
pub struct CliArgs {
    /// Force dry-run mode regardless of DRY_RUN
    #[arg(long)]
    pub dry_run: bool,

    /// Print outgoing Policy API payloads to stderr
    #[arg(long)]
    pub print_payloads: bool,

    /// Use mock Policy responses instead of a real network call
    #[arg(long)]
    pub mock_mode: bool,

    /// Override STATE_DIR
    #[arg(long)]
    pub state_dir: Option<PathBuf>,

    /// Override LOG_PATH
    #[arg(long)]
    pub log_path: Option<PathBuf>,

    /// Enable verbose diagnostic tracing to DEBUG_TRACE_PATH
    #[arg(long)]
    pub debug_trace: bool,
}

/// Immutable configuration for a single invocation.
///
/// Constructed once per process via [`RunConfig::load`] and then passed by
/// reference everywhere; nothing below this point reads the environment
/// directly.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub enabled: bool,
    pub mode: Mode,
    pub dry_run: bool,
    pub print_payloads: bool,
    pub mock_mode: bool,
    pub mock_block_tokens: Vec<String>,
    pub fail_open: bool,
    pub api_url: String,
    pub api_key: String,
    pub profile_id: String,
    pub use_case_id: String,
    pub user_id: String,
    pub max_content_chars: usize,
    pub request_timeout: Duration,
    pub state_dir: PathBuf,
    pub log_path: PathBuf,
    pub skip_telemetry_api_send: bool,
    pub llm_transcript_local_only: bool,
    pub tiny_debug_mode: bool,
    pub debug_trace: bool,
    pub debug_trace_path: Option<PathBuf>,
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_list(key: &str) -> Vec<String> {
    std::env::var(key)
        .ok()
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

impl RunConfig {
    /// Build the run configuration from environment variables, then layer
    /// CLI overrides on top. Fails only when enforce mode is selected and
    /// the API key required to reach the Policy API is empty — every other
    /// condition degrades to a safe default per the fail-open error taxonomy.
    pub fn load(cli: &CliArgs) -> Result<Self> {
        let mode = env_string("MODE", "enforce")
            .parse::<Mode>()
            .unwrap_or(Mode::Enforce);

        let state_dir = cli
            .state_dir
            .clone()
            .or_else(|| std::env::var("STATE_DIR").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(".hookguard/state"));

        let log_path = cli
            .log_path
            .clone()
            .or_else(|| std::env::var("LOG_PATH").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(".hookguard/audit.jsonl"));

        let debug_trace = cli.debug_trace || env_bool("DEBUG_TRACE", false);
        let debug_trace_path = std::env::var("DEBUG_TRACE_PATH")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                if debug_trace {
                    Some(PathBuf::from(".hookguard/trace.log"))
                } else {
                    None
                }
            });

        let fail_open = env_bool("FAIL_OPEN", true);
        let api_key = env_string("API_KEY", "");

        if mode == Mode::Enforce && api_key.is_empty() && !cli.mock_mode && !cli.dry_run {
            // A configuration error in enforce mode never aborts the invocation;
            // it is logged by the caller and the engine proceeds fail-open.
            if !fail_open {
                return Err(Error::config(
                    "API_KEY is required in enforce mode when fail_open is false",
                ));
            }
        }

        Ok(RunConfig {
            enabled: env_bool("ENABLED", true),
            mode,
            dry_run: cli.dry_run || env_bool("DRY_RUN", false),
            print_payloads: cli.print_payloads || env_bool("PRINT_PAYLOADS", false),
            mock_mode: cli.mock_mode || env_bool("MOCK_MODE", false),
            mock_block_tokens: env_list("MOCK_BLOCK_TOKENS"),
            fail_open,
            api_url: env_string("API_URL", ""),
            api_key,
            profile_id: env_string("PROFILE_ID", ""),
            use_case_id: env_string("USE_CASE_ID", ""),
            user_id: env_string("USER_ID", ""),
            max_content_chars: env_usize("MAX_CONTENT_CHARS", 100_000),
            request_timeout: Duration::from_secs(env_u64("REQUEST_TIMEOUT_SECONDS", 15)),
            state_dir,
            log_path,
            skip_telemetry_api_send: env_bool("SKIP_TELEMETRY_API_SEND", true),
            llm_transcript_local_only: env_bool("LLM_TRANSCRIPT_LOCAL_ONLY", true),
            tiny_debug_mode: env_bool("TINY_DEBUG_MODE", false),
            debug_trace,
            debug_trace_path,
        })
    }
}
