use std::io::Write;
use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::Parser;
use tokio::signal;
use tokio::signal::unix::SignalKind;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use hassdeck::backend::hass::HassSession;
use hassdeck::config;
use hassdeck::error::ApiResult;
use hassdeck_api::event::SessionEvent;

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: Utf8PathBuf,
}

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

fn init_logging() -> ApiResult<()> {
    /* Try to provide reasonable default filters, when RUST_LOG is not specified */
    const DEFAULT_LOG_FILTERS: &[&str] = &["debug", "tungstenite=info", "tokio_tungstenite=info"];

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

fn install_signal_handlers(stop: &CancellationToken) -> ApiResult<()> {
    fn shutdown(msg: &str, stop: &CancellationToken) {
        log::warn!("{msg}");
        let _ = std::io::stderr().flush();
        stop.cancel();
    }

    let token = stop.clone();
    tokio::spawn(async move {
        if matches!(signal::ctrl_c().await, Ok(())) {
            shutdown("Ctrl-C pressed, exiting..", &token);
        }
    });

    let token = stop.clone();
    let mut signal = signal::unix::signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        if matches!(signal.recv().await, Some(())) {
            shutdown("SIGTERM received, exiting..", &token);
        }
    });

    Ok(())
}

fn log_overview(session: &HassSession) {
    let state = session.state();
    for group in session.area_groups() {
        log::info!("{} ({} entities)", group.name, group.entity_ids.len());
        for id in &group.entity_ids {
            log::info!(
                "  {id}: {} brightness {}",
                if state.is_on(id) { "on " } else { "off" },
                state.get_effective_brightness(id)
            );
        }
    }
}

async fn run() -> ApiResult<()> {
    init_logging()?;

    let args = Args::parse();
    let config = config::parse(&args.config)?;
    log::debug!("Configuration loaded successfully");

    let stop = CancellationToken::new();
    install_signal_handlers(&stop)?;

    let session = Arc::new(HassSession::new("hass", config)?);
    let mut events = session.subscribe();
    let mut health = session.health().subscribe();

    session.start().await?;
    log_overview(&session);

    loop {
        tokio::select! {
            () = stop.cancelled() => break,
            ev = events.recv() => match ev {
                Ok(SessionEvent::EntityChanged(id)) => {
                    log::debug!(
                        "{id} changed, brightness {}",
                        session.state().get_effective_brightness(&id)
                    );
                }
                Ok(SessionEvent::EntityRemoved(id)) => log::info!("{id} removed"),
                Ok(SessionEvent::EntitiesReloaded) => log::debug!("State reloaded"),
                Err(RecvError::Lagged(n)) => log::warn!("Dropped {n} session events"),
                Err(RecvError::Closed) => break,
            },
            res = health.changed() => {
                if res.is_err() {
                    break;
                }
                log::info!("Connection health: {:?}", *health.borrow_and_update());
            }
        }
    }

    session.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        log::error!("Hassdeck error: {err}");
        log::error!("Fatal error encountered, cannot continue.");
    }
}
