use std::io::Read;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use hookguard_core::{CliArgs, Decision, Error, HookEnvelope, Mediator, RunConfig};

/// Exit code the host treats as "something went wrong internally, allow by
/// default" rather than a genuine block/deny decision.
const EXIT_INTERNAL_ERROR: i32 = 2;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = CliArgs::parse();
    let code = run(cli).await;
    std::process::exit(code);
}

async fn run(cli: CliArgs) -> i32 {
    let cfg = match RunConfig::load(&cli) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("[hookguard] config error: {e}");
            Decision::Allow.emit();
            return EXIT_INTERNAL_ERROR;
        }
    };

    init_tracing(&cfg);

    let mut raw = String::new();
    if let Err(e) = std::io::stdin().read_to_string(&mut raw) {
        tracing::warn!(error = %e, "failed to read stdin");
        Decision::Allow.emit();
        return EXIT_INTERNAL_ERROR;
    }

    let envelope = match HookEnvelope::parse(&raw) {
        Ok(e) => e,
        Err(e) => {
            // A malformed envelope can't be classified or paired; the safest
            // response is to allow and let the host proceed. Fail-open
            // errors never surface to the host as a non-zero exit.
            tracing::warn!(error = %e, "malformed hook envelope");
            Decision::Allow.emit();
            return 0;
        }
    };

    tracing::debug!(
        hook_event_name = %envelope.hook_event_name,
        session_id = %envelope.session_id,
        "handling invocation"
    );

    let decision = match dispatch(cfg, &envelope).await {
        Ok(decision) => decision,
        Err(e) => {
            tracing::error!(error = %e, "mediation failed, allowing by default");
            Decision::Allow
        }
    };

    decision.emit();
    0
}

async fn dispatch(cfg: RunConfig, envelope: &HookEnvelope) -> Result<Decision, Error> {
    let mut mediator = Mediator::new(cfg)?;
    mediator.handle(envelope).await
}

fn init_tracing(cfg: &RunConfig) {
    let default_filter = if cfg.debug_trace {
        "hookguard_core=debug,hookguard=debug"
    } else {
        "hookguard_core=info,hookguard=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).json();

    match &cfg.debug_trace_path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            match std::fs::OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => {
                    builder.with_writer(move || file.try_clone().expect("clone trace file handle")).init();
                }
                Err(e) => {
                    eprintln!("[hookguard] cannot open debug_trace_path {path:?}: {e}");
                    builder.init();
                }
            }
        }
        None => builder.init(),
    }
}
