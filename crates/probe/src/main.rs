#[cfg(feature = "adc")]
mod adc;
mod buffer;
mod clock;
mod config;
mod error;
mod indicator;
mod measurement;
mod orchestrator;
mod sampler;
mod sensor;
#[cfg(feature = "sim")]
mod sim;
mod transport;

use std::{env, time::Duration};

use anyhow::Result;
use tokio::signal;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use buffer::MeasurementBuffer;
use clock::SyncedClock;
use error::Fault;
use orchestrator::Orchestrator;
use sampler::Sampler;
use transport::{MqttSession, MqttSettings, SntpClient, WifiLink};

const DEFAULT_CONFIG_PATH: &str = "probe.toml";
const DEFAULT_LOG_FILTER: &str = "moisture_probe=info";
/// Pause before exiting on a fatal fault, so a supervisor restart loop
/// does not spin.
const RESTART_DELAY: Duration = Duration::from_secs(10);
/// How long tasks get to reach their loop boundary after Ctrl-C.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(15);

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // ── Logging ─────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    // ── Config ──────────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let cfg = config::load(&config_path)?;

    // ── Sampling side ───────────────────────────────────────────────
    let buffer = MeasurementBuffer::new(cfg.sampling.buffer_capacity);
    let clock = SyncedClock::new();

    let mut sampler = Sampler::new(
        sensor::build(&cfg.sensor)?,
        indicator::build(&cfg.indicator)?,
        buffer.clone(),
        clock.clone(),
        Duration::from_secs(cfg.sampling.interval_s),
    );

    // ── Delivery side ───────────────────────────────────────────────
    let mut orchestrator = Orchestrator::new(
        WifiLink::from_config(&cfg.wifi),
        SntpClient::new(clock),
        MqttSession::new(MqttSettings::from_config(&cfg.mqtt)),
        buffer,
        cfg.mqtt.topic.as_str(),
        cfg.ntp.server.as_str(),
    );

    // ── Run until fatal fault or Ctrl-C ─────────────────────────────
    let cancel = CancellationToken::new();
    let outcome = {
        let tasks = async {
            tokio::try_join!(sampler.run(&cancel), async {
                orchestrator.run(&cancel).await;
                Ok::<(), Fault>(())
            })
            .map(|_| ())
        };
        tokio::pin!(tasks);

        tokio::select! {
            res = &mut tasks => res,
            () = shutdown_signal() => {
                info!("shutdown requested");
                cancel.cancel();
                match timeout(SHUTDOWN_GRACE, &mut tasks).await {
                    Ok(res) => res,
                    Err(_) => {
                        warn!(grace = ?SHUTDOWN_GRACE, "tasks still busy, exiting anyway");
                        Ok(())
                    }
                }
            }
        }
    };

    match outcome {
        Ok(()) => {
            info!(
                published = orchestrator.published(),
                state = ?orchestrator.state(),
                "probe stopped"
            );
            Ok(())
        }
        Err(fault) => {
            error!(
                %fault,
                recoverable = fault.is_recoverable(),
                restart_in = ?RESTART_DELAY,
                "fatal fault, exiting for restart"
            );
            sleep(RESTART_DELAY).await;
            Err(fault.into())
        }
    }
}

/// Resolves on Ctrl-C. If the handler cannot be installed the probe simply
/// runs without one.
async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        warn!("cannot listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
}
