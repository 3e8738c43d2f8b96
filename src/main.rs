use std::io::Write;
use std::sync::Arc;

use tokio::signal;
use tokio::signal::unix::SignalKind;

use isgbridge::config;
use isgbridge::error::BridgeResult;
use isgbridge::isg::IsgBridge;
use isgbridge::store::{MemoryStore, NoTranslation, ObjectStore};

/*
 * Formatter function to output in syslog format. This makes sense when running
 * as a service (where output might go to a log file, or the system journal)
 */
#[allow(clippy::match_same_arms)]
fn syslog_format(
    buf: &mut pretty_env_logger::env_logger::fmt::Formatter,
    record: &log::Record,
) -> std::io::Result<()> {
    writeln!(
        buf,
        "<{}>{}: {}",
        match record.level() {
            log::Level::Error => 3,
            log::Level::Warn => 4,
            log::Level::Info => 6,
            log::Level::Debug => 7,
            log::Level::Trace => 7,
        },
        record.target(),
        record.args()
    )
}

fn init_logging() -> BridgeResult<()> {
    /* Try to provide reasonable default filters, when RUST_LOG is not specified */
    const DEFAULT_LOG_FILTERS: &[&str] = &["debug", "selectors=info", "html5ever=info", "h2=info"];

    let log_filters = std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTERS.join(","));

    /* Detect if we need syslog or human-readable formatting */
    if std::env::var("SYSTEMD_EXEC_PID").is_ok_and(|pid| pid == std::process::id().to_string()) {
        Ok(pretty_env_logger::env_logger::builder()
            .format(syslog_format)
            .parse_filters(&log_filters)
            .try_init()?)
    } else {
        Ok(pretty_env_logger::formatted_timed_builder()
            .parse_filters(&log_filters)
            .try_init()?)
    }
}

async fn run() -> BridgeResult<()> {
    init_logging()?;

    let config = config::parse("config.yaml".into())?;
    log::debug!("Configuration loaded successfully");

    let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());

    let bridge = match IsgBridge::new(config, store.clone(), Arc::new(NoTranslation)) {
        Ok(bridge) => bridge,
        Err(err) => {
            // Invalid gateway settings are fatal; leave the connectivity
            // flag down so the host surfaces the broken state.
            store.set_connected(false).await;
            return Err(err);
        }
    };

    let mut sigterm = signal::unix::signal(SignalKind::terminate())?;
    tokio::select! {
        result = bridge.run() => result,
        _ = signal::ctrl_c() => {
            log::warn!("Ctrl-C pressed, exiting..");
            let _ = std::io::stderr().flush();
            Ok(())
        }
        _ = sigterm.recv() => {
            log::warn!("SIGTERM received, exiting..");
            let _ = std::io::stderr().flush();
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        log::error!("Bridge error: {err}");
        log::error!("Fatal error encountered, cannot continue.");
    }
}
