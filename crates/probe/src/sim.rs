//! Stateful soil moisture sensor simulator for local development.
//!
//! Produces raw 16-bit counts with the same orientation as the real probe
//! (low = wet, high = dry):
//! - Temporal coherence via random walk with mean reversion
//! - Gradual drying drift (evaporation)
//! - Per-reading electronic noise
//! - Occasional spikes (sensor flakiness)

use std::fmt;

use anyhow::Result;

use crate::sensor::RawAdc;

/// Count read with the probe in open air.
const RAW_DRY: f64 = 52_000.0;
/// Count read with the probe in a glass of water.
const RAW_WET: f64 = 20_000.0;

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    (0..12).map(|_| fastrand::f64()).sum::<f64>() - 6.0
}

fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Simulation profiles selectable via `sensor.scenario`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Starts mid-range and drifts toward dry. Moderate noise.
    Drying,
    /// Hovers near the centre. Low noise, rare spikes.
    Stable,
    /// High noise and frequent spikes.
    Flaky,
    /// Starts near the wet end and dries very slowly.
    Wet,
}

impl Scenario {
    const ALL: [Scenario; 4] = [Self::Drying, Self::Stable, Self::Flaky, Self::Wet];

    /// Unknown names fall back to `Drying`.
    pub fn from_str_lossy(s: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|sc| sc.as_str().eq_ignore_ascii_case(s))
            .unwrap_or(Self::Drying)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Drying => "drying",
            Self::Stable => "stable",
            Self::Flaky => "flaky",
            Self::Wet => "wet",
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

pub struct SoilMoistureSim {
    /// Current "true" soil state in ADC counts.
    base: f64,
    center: f64,
    drift_per_sample: f64,
    walk_sigma: f64,
    mean_reversion: f64,
    noise_sigma: f64,
    spike_prob: f64,
    spike_sigma: f64,
}

impl SoilMoistureSim {
    pub fn new(scenario: Scenario) -> Self {
        let range = RAW_DRY - RAW_WET;

        // start_frac: 0.0 = at RAW_WET, 1.0 = at RAW_DRY
        let (drift, walk_sigma, mean_rev, noise_sigma, spike_prob, spike_sigma, start_frac) =
            match scenario {
                Scenario::Drying => (30.0, 300.0, 0.02, 150.0, 0.03, 4000.0, 0.5),
                Scenario::Stable => (4.0, 120.0, 0.05, 80.0, 0.005, 2000.0, 0.5),
                Scenario::Flaky => (20.0, 500.0, 0.02, 400.0, 0.10, 6000.0, 0.5),
                Scenario::Wet => (6.0, 160.0, 0.02, 120.0, 0.02, 3000.0, 0.15),
            };

        let start = RAW_WET + start_frac * range;

        Self {
            base: start + gaussian(0.0, range * 0.03),
            center: start,
            drift_per_sample: drift,
            walk_sigma,
            mean_reversion: mean_rev,
            noise_sigma,
            spike_prob,
            spike_sigma,
        }
    }

    /// Advance the soil state one tick and return the instantaneous count.
    pub fn sample(&mut self) -> u16 {
        let pull = self.mean_reversion * (self.center - self.base);
        let walk = gaussian(0.0, self.walk_sigma);

        self.base = (self.base + self.drift_per_sample + pull + walk)
            .clamp(RAW_WET - 1_000.0, RAW_DRY + 1_000.0);

        let noise = gaussian(0.0, self.noise_sigma);
        let spike = if fastrand::f64() < self.spike_prob {
            gaussian(0.0, self.spike_sigma)
        } else {
            0.0
        };

        (self.base + noise + spike)
            .round()
            .clamp(0.0, f64::from(u16::MAX)) as u16
    }
}

impl RawAdc for SoilMoistureSim {
    fn read_raw(&mut self) -> Result<u16> {
        Ok(self.sample())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
