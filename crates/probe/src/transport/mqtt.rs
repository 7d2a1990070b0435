//! Broker session on top of rumqttc.
//!
//! `connect` builds a fresh client, waits for the CONNACK, then hands the
//! event loop to a background driver task. The driver stops on the first
//! connection error instead of letting rumqttc reconnect on its own; the
//! next publish then fails and the orchestrator restarts recovery.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::BrokerSession;
use crate::config::MqttConfig;

/// Upper bound on TCP connect + CONNECT/CONNACK.
const CONNACK_TIMEOUT: Duration = Duration::from_secs(10);
/// Outgoing request queue between client handle and event loop.
const REQUEST_CAPACITY: usize = 10;

#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub client_id: String,
    pub host: String,
    pub port: u16,
    pub credentials: Option<(String, String)>,
    pub keep_alive: Duration,
}

impl MqttSettings {
    pub fn from_config(cfg: &MqttConfig) -> Self {
        Self {
            client_id: cfg.wire_client_id(),
            host: cfg.broker.clone(),
            port: cfg.port,
            credentials: (!cfg.username.is_empty())
                .then(|| (cfg.username.clone(), cfg.password.clone())),
            keep_alive: Duration::from_secs(cfg.keep_alive_s),
        }
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);
        if let Some((user, pass)) = &self.credentials {
            options.set_credentials(user, pass);
        }
        options
    }
}

pub struct MqttSession {
    settings: MqttSettings,
    client: Option<AsyncClient>,
    driver: Option<JoinHandle<()>>,
}

impl MqttSession {
    pub fn new(settings: MqttSettings) -> Self {
        Self {
            settings,
            client: None,
            driver: None,
        }
    }

    /// Forget any previous session without talking to the broker.
    fn reset(&mut self) {
        self.client = None;
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }

    fn driver_alive(&self) -> bool {
        self.driver.as_ref().is_some_and(|d| !d.is_finished())
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        self.reset();
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<()> {
    loop {
        match eventloop.poll().await.context("broker connection failed")? {
            Event::Incoming(Packet::ConnAck(ack)) => {
                if ack.code == ConnectReturnCode::Success {
                    return Ok(());
                }
                bail!("broker refused connection: {:?}", ack.code);
            }
            other => debug!(?other, "mqtt event before connack"),
        }
    }
}

/// Keep the connection serviced (outgoing publishes, pings) until it breaks.
async fn drive(mut eventloop: EventLoop) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("broker sent disconnect");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("mqtt connection lost: {e}");
                return;
            }
        }
    }
}

impl BrokerSession for MqttSession {
    async fn connect(&mut self) -> Result<()> {
        self.reset();

        let (client, mut eventloop) = AsyncClient::new(self.settings.options(), REQUEST_CAPACITY);
        timeout(CONNACK_TIMEOUT, wait_for_connack(&mut eventloop))
            .await
            .with_context(|| format!("no CONNACK within {CONNACK_TIMEOUT:?}"))?
            .with_context(|| format!("connecting to {}:{}", self.settings.host, self.settings.port))?;

        self.driver = Some(tokio::spawn(drive(eventloop)));
        self.client = Some(client);

        info!(
            broker = %self.settings.host,
            port = self.settings.port,
            "connected to mqtt broker"
        );
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        let result = match &self.client {
            Some(client) if self.driver_alive() => client
                .disconnect()
                .await
                .context("failed to send mqtt disconnect"),
            _ => Ok(()),
        };
        // Let the driver flush the DISCONNECT before it goes away.
        if let Some(driver) = self.driver.as_mut() {
            let _ = timeout(Duration::from_secs(1), driver).await;
        }
        self.reset();
        result
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<()> {
        let client = self.client.as_ref().context("no broker session")?;
        if !self.driver_alive() {
            bail!("broker connection lost");
        }
        client
            .publish(topic, QoS::AtMostOnce, false, payload.to_vec())
            .await
            .context("failed to queue publish")?;
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
