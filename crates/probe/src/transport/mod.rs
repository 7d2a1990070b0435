//! Network capabilities consumed by the orchestrator.
//!
//! Each trait is the narrow surface of one collaborator: the wireless link,
//! the time source, and the broker session. Failures come back as values
//! (`bool` for the link, `anyhow::Result` for the rest) and are classified by
//! the orchestrator.

pub mod link;
pub mod mqtt;
pub mod ntp;

pub use link::WifiLink;
pub use mqtt::{MqttSession, MqttSettings};
pub use ntp::SntpClient;

use anyhow::Result;

#[allow(async_fn_in_trait)]
pub trait Link {
    async fn is_active(&mut self) -> bool;

    /// Bring the link up, waiting a bounded time for it to settle.
    /// Returns whether it ended up active.
    async fn connect(&mut self) -> bool;

    async fn disconnect(&mut self);
}

#[allow(async_fn_in_trait)]
pub trait TimeSync {
    async fn sync(&mut self, server: &str) -> Result<()>;
}

#[allow(async_fn_in_trait)]
pub trait BrokerSession {
    async fn connect(&mut self) -> Result<()>;

    async fn disconnect(&mut self) -> Result<()>;

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<()>;
}
