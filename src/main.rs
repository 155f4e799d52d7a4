use clap::Parser;
use std::panic::{self, PanicHookInfo};
use switchbot_collector::config::{env_lookup, load_dotenv};
use switchbot_collector::{
    BleDiscovery, InfluxDbSink, LogFormat, Options, RunConfiguration, RunOutcome,
    TracingReporter, collect,
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Exit codes for the application
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

fn init_tracing(options: &Options) {
    let default_level = if options.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    match options.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set up panic hook to ensure clean exit codes for process managers
    // (e.g., systemd timers, cron) that monitor exit status
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    // Before parsing so clap's env fallbacks see the file too
    let dotenv = load_dotenv();

    let options = Options::parse();
    init_tracing(&options);

    match dotenv {
        Ok(Some(path)) => debug!(path = %path.display(), "loaded environment file"),
        Ok(None) => {}
        Err(error) => warn!(%error, "failed to load .env file"),
    }

    let discovery = BleDiscovery {
        backend: options.backend,
    };
    let write_timeout = options.write_timeout;

    let result = collect(
        env_lookup,
        &options,
        &discovery,
        |config: &RunConfiguration| InfluxDbSink::new(config, write_timeout),
        &TracingReporter,
    )
    .await;

    match result {
        Ok(outcome) => {
            if let RunOutcome::Completed {
                skipped,
                written,
                failed,
            } = outcome
            {
                info!(skipped, written, failed, "run finished");
            }
            std::process::exit(EXIT_SUCCESS);
        }
        Err(why) => {
            error!(error = %why, "run failed");
            std::process::exit(EXIT_ERROR);
        }
    }
}
