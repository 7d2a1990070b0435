//! Connection recovery and publish loop.
//!
//! ## Recovery stages
//!
//! ```text
//! Disconnected ──[link up]──▶ LinkUp ──[time sync]──▶ TimeSynced ──[broker]──▶ SessionUp
//!      ▲   │                                 │                          │            │
//!      │   └─[link fails: backoff]──▶(retry) │                          │            ▼
//!      │                                     └──[fail: drop link, backoff]┘      Publishing
//!      │                                                                             │
//!      └──────────────────────────[publish fails: no teardown]───────────────────────┘
//! ```
//!
//! Every pass starts again from `Disconnected`; no stage relies on state left
//! by an earlier attempt. The publish loop drains the buffer newest-first, one
//! measurement per poll interval. A measurement whose publish fails is lost.

use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::buffer::MeasurementBuffer;
use crate::error::Fault;
use crate::measurement::Measurement;
use crate::transport::{BrokerSession, Link, TimeSync};

/// Wait after a failed link, time-sync, or broker stage.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(10);
/// Interval between buffer polls while publishing.
pub const DEFAULT_PUBLISH_POLL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    Disconnected,
    LinkUp,
    TimeSynced,
    SessionUp,
    Publishing,
}

#[derive(Debug, Clone, Copy)]
pub struct RecoveryPolicy {
    pub backoff: Duration,
    pub publish_poll: Duration,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            backoff: DEFAULT_BACKOFF,
            publish_poll: DEFAULT_PUBLISH_POLL,
        }
    }
}

pub struct Orchestrator<L, T, B> {
    link: L,
    time: T,
    broker: B,
    buffer: MeasurementBuffer,
    topic: String,
    ntp_server: String,
    policy: RecoveryPolicy,
    state: RecoveryState,
    published: u64,
    #[cfg(test)]
    history: Vec<RecoveryState>,
}

impl<L: Link, T: TimeSync, B: BrokerSession> Orchestrator<L, T, B> {
    pub fn new(
        link: L,
        time: T,
        broker: B,
        buffer: MeasurementBuffer,
        topic: impl Into<String>,
        ntp_server: impl Into<String>,
    ) -> Self {
        Self {
            link,
            time,
            broker,
            buffer,
            topic: topic.into(),
            ntp_server: ntp_server.into(),
            policy: RecoveryPolicy::default(),
            state: RecoveryState::Disconnected,
            published: 0,
            #[cfg(test)]
            history: Vec::new(),
        }
    }

    #[cfg(test)]
    pub fn with_policy(mut self, policy: RecoveryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn state(&self) -> RecoveryState {
        self.state
    }

    /// Measurements handed to the broker since start.
    pub fn published(&self) -> u64 {
        self.published
    }

    /// Recover and publish until `cancel` fires.
    ///
    /// The token is only looked at between full recover/publish rounds, so
    /// cancellation waits for the current round to end (a publish failure).
    /// Backoff waits and in-flight network calls are never interrupted.
    pub async fn run(&mut self, cancel: &CancellationToken) {
        info!(topic = %self.topic, ntp = %self.ntp_server, "orchestrator started");

        while !cancel.is_cancelled() {
            self.recover().await;
            let fault = self.publish_until_fault().await;
            warn!(%fault, "publishing interrupted, reconnecting");
        }

        if let Err(e) = self.broker.disconnect().await {
            debug!("broker disconnect on shutdown failed: {e:#}");
        }
        if !self.buffer.is_empty() {
            warn!(unsent = self.buffer.len(), "stopping with measurements still buffered");
        }
        info!(published = self.published, "orchestrator stopped");
    }

    /// Drive the stages until a broker session is up. Never gives up.
    pub(crate) async fn recover(&mut self) {
        loop {
            match self.establish().await {
                Ok(()) => return,
                Err(fault) => self.back_off(fault).await,
            }
        }
    }

    async fn establish(&mut self) -> Result<(), Fault> {
        self.enter(RecoveryState::Disconnected);

        if !self.link.is_active().await {
            info!("link down, reconnecting");
            if !self.link.connect().await {
                return Err(Fault::Link);
            }
        }
        self.enter(RecoveryState::LinkUp);

        self.time
            .sync(&self.ntp_server)
            .await
            .map_err(Fault::TimeSync)?;
        self.enter(RecoveryState::TimeSynced);

        self.broker.connect().await.map_err(Fault::Broker)?;
        self.enter(RecoveryState::SessionUp);

        Ok(())
    }

    async fn back_off(&mut self, fault: Fault) {
        if fault.tears_down_link() {
            warn!(%fault, backoff = ?self.policy.backoff, "session setup failed, dropping link");
            self.link.disconnect().await;
        } else {
            warn!(%fault, backoff = ?self.policy.backoff, "retrying link");
        }
        self.enter(RecoveryState::Disconnected);
        sleep(self.policy.backoff).await;
    }

    /// Publish newest-first until a publish fails; returns that failure.
    pub(crate) async fn publish_until_fault(&mut self) -> Fault {
        self.enter(RecoveryState::Publishing);

        loop {
            if let Some(m) = self.buffer.take_latest() {
                if let Err(fault) = self.publish(m).await {
                    self.enter(RecoveryState::Disconnected);
                    return fault;
                }
            }
            sleep(self.policy.publish_poll).await;
        }
    }

    async fn publish(&mut self, m: Measurement) -> Result<(), Fault> {
        let payload = m.to_payload().map_err(|e| Fault::Publish(e.into()))?;
        self.broker
            .publish(&self.topic, &payload)
            .await
            .map_err(Fault::Publish)?;
        self.published += 1;
        debug!(
            measure = m.measure,
            ts = m.ts,
            backlog = self.buffer.len(),
            "published"
        );
        Ok(())
    }

    fn enter(&mut self, next: RecoveryState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "recovery state");
        }
        self.state = next;
        #[cfg(test)]
        self.history.push(next);
    }
}

// ===========================================================================
// Tests
// ===========================================================================
