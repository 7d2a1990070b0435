//! Sensor seam: the sampler reads a moisture percentage through
//! [`MoistureSensor`]; concrete backends supply a raw 16-bit ADC count
//! through [`RawAdc`] and get scaled by [`ScaledSensor`].

use anyhow::Result;

use crate::config::{SensorConfig, SensorKind};

/// Full-scale count of a 16-bit ADC reading.
pub const ADC_FULL_SCALE: f64 = 65535.0;

pub trait MoistureSensor {
    /// Current moisture in percent. Not range-checked.
    fn read_moisture(&mut self) -> Result<f64>;
}

impl<S: MoistureSensor + ?Sized> MoistureSensor for Box<S> {
    fn read_moisture(&mut self) -> Result<f64> {
        (**self).read_moisture()
    }
}

/// Source of raw 16-bit counts (0 = wet probe, full scale = dry probe).
pub trait RawAdc {
    fn read_raw(&mut self) -> Result<u16>;
}

/// Convert a raw count to percent moisture. 0 reads as 100 % (wet),
/// full scale as 0 % (dry).
pub fn moisture_percent(raw: u16) -> f64 {
    100.0 - (f64::from(raw) / ADC_FULL_SCALE) * 100.0
}

pub struct ScaledSensor<A> {
    adc: A,
}

impl<A: RawAdc> ScaledSensor<A> {
    pub fn new(adc: A) -> Self {
        Self { adc }
    }
}

impl<A: RawAdc> MoistureSensor for ScaledSensor<A> {
    fn read_moisture(&mut self) -> Result<f64> {
        let raw = self.adc.read_raw()?;
        let pct = moisture_percent(raw);
        tracing::trace!(raw, pct, "sensor read");
        Ok(pct)
    }
}

// ---------------------------------------------------------------------------
// Construction from config
// ---------------------------------------------------------------------------

pub fn build(cfg: &SensorConfig) -> Result<Box<dyn MoistureSensor>> {
    match cfg.kind {
        SensorKind::Sim => build_sim(cfg),
        SensorKind::Adc => build_adc(cfg),
    }
}

#[cfg(feature = "sim")]
fn build_sim(cfg: &SensorConfig) -> Result<Box<dyn MoistureSensor>> {
    use crate::sim::{Scenario, SoilMoistureSim};

    let scenario = Scenario::from_str_lossy(&cfg.scenario);
    tracing::info!(%scenario, "using simulated moisture sensor");
    Ok(Box::new(ScaledSensor::new(SoilMoistureSim::new(scenario))))
}

#[cfg(not(feature = "sim"))]
fn build_sim(_cfg: &SensorConfig) -> Result<Box<dyn MoistureSensor>> {
    anyhow::bail!("sensor kind `sim` requires building with the `sim` feature")
}

#[cfg(feature = "adc")]
fn build_adc(cfg: &SensorConfig) -> Result<Box<dyn MoistureSensor>> {
    let adc = crate::adc::Ads1115::new(cfg.i2c_address, cfg.channel)?;
    Ok(Box::new(ScaledSensor::new(adc)))
}

#[cfg(not(feature = "adc"))]
fn build_adc(_cfg: &SensorConfig) -> Result<Box<dyn MoistureSensor>> {
    anyhow::bail!("sensor kind `adc` requires building with the `adc` feature")
}

// ===========================================================================
// Tests
// ===========================================================================
