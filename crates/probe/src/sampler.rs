//! Periodic sampling: read the sensor, stamp it, push it into the shared
//! buffer. Never touches the network.

use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::buffer::MeasurementBuffer;
use crate::clock::SyncedClock;
use crate::error::Fault;
use crate::indicator::StatusLed;
use crate::measurement::Measurement;
use crate::sensor::MoistureSensor;

pub struct Sampler<S, L> {
    sensor: S,
    led: L,
    buffer: MeasurementBuffer,
    clock: SyncedClock,
    interval: Duration,
}

impl<S: MoistureSensor, L: StatusLed> Sampler<S, L> {
    pub fn new(
        sensor: S,
        led: L,
        buffer: MeasurementBuffer,
        clock: SyncedClock,
        interval: Duration,
    ) -> Self {
        Self {
            sensor,
            led,
            buffer,
            clock,
            interval,
        }
    }

    /// Take one reading and push it. A sensor error is returned as
    /// [`Fault::Sensor`] and is not retried.
    pub fn tick(&mut self) -> Result<Measurement, Fault> {
        self.led.set(true);
        let reading = self.sensor.read_moisture();
        self.led.set(false);

        let m = Measurement::new(reading.map_err(Fault::Sensor)?, self.clock.now_unix());
        self.buffer.push(m);
        Ok(m)
    }

    /// Sample every `interval` until `cancel` fires. The token is checked
    /// once per tick; an in-progress sleep is not cut short.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<(), Fault> {
        info!(
            interval_s = self.interval.as_secs(),
            capacity = self.buffer.capacity(),
            "sampler started"
        );

        while !cancel.is_cancelled() {
            let m = self.tick()?;
            debug!(
                measure = m.measure,
                ts = m.ts,
                synced = self.clock.is_synced(),
                buffered = self.buffer.len(),
                "sampled"
            );
            sleep(self.interval).await;
        }

        info!("sampler stopped");
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
