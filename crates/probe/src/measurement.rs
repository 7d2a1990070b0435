use serde::Serialize;

// ---------------------------------------------------------------------------
// Measurement
// ---------------------------------------------------------------------------

/// One timestamped moisture sample.
///
/// `measure` is percent moisture, nominally 0..=100. Values outside that
/// range are carried as-is. `ts` is unix seconds at sample time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Measurement {
    pub measure: f64,
    pub ts: i64,
}

impl Measurement {
    pub fn new(measure: f64, ts: i64) -> Self {
        Self { measure, ts }
    }

    /// JSON body published to the broker: `{"measure":..,"ts":..}`.
    pub fn to_payload(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
