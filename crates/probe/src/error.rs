use thiserror::Error;

/// Failure outcomes of the sampling and delivery pipeline.
///
/// Everything except `Sensor` is absorbed by the orchestrator and turned into
/// a fresh pass through the recovery stages.
#[derive(Debug, Error)]
pub enum Fault {
    #[error("sensor read failed: {0:#}")]
    Sensor(anyhow::Error),

    #[error("link could not be brought up")]
    Link,

    #[error("time sync failed: {0:#}")]
    TimeSync(anyhow::Error),

    #[error("broker connect failed: {0:#}")]
    Broker(anyhow::Error),

    #[error("publish failed: {0:#}")]
    Publish(anyhow::Error),
}

impl Fault {
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Fault::Sensor(_))
    }

    /// Whether recovery from this fault starts by dropping the link.
    pub fn tears_down_link(&self) -> bool {
        matches!(self, Fault::TimeSync(_) | Fault::Broker(_))
    }
}
