//! ADS1115 16-bit ADC reader over I2C for the soil moisture probe.
//!
//! Single-ended, single-shot reads at PGA ±4.096 V and 128 SPS. The
//! conversion result is 15-bit for single-ended inputs and is widened to the
//! 16-bit count the moisture scaling expects.

use anyhow::{ensure, Result};
use rppal::i2c::I2c;
use std::{thread, time::Duration};

use crate::sensor::RawAdc;

// ── Registers ───────────────────────────────────────────────────────────────

const REG_CONVERSION: u8 = 0x00;
const REG_CONFIG: u8 = 0x01;

/// OS=1 (start), PGA=001 (±4.096 V), MODE=1 (single-shot),
/// DR=100 (128 SPS), COMP_QUE=11 (comparator off).
const CONFIG_BASE: u16 = 0b1_000_001_1_100_0_0_0_11;

/// Single-ended MUX codes for AIN0..AIN3, placed at bits 14:12.
const MUX_SHIFT: u8 = 12;
const MUX_SINGLE_ENDED: [u16; 4] = [0b100, 0b101, 0b110, 0b111];

const MAX_CHANNEL: usize = 3;

/// One conversion at 128 SPS takes ~7.8 ms.
const CONVERSION_WAIT: Duration = Duration::from_millis(9);

/// Config register bit 15 reads back as 1 once the conversion is done.
const OS_READY_BIT: u16 = 1 << 15;

fn config_for_channel(channel: usize) -> u16 {
    CONFIG_BASE | (MUX_SINGLE_ENDED[channel] << MUX_SHIFT)
}

/// Map a signed single-ended result (0..=32767) onto 0..=65534.
fn widen(raw: i16) -> u16 {
    (raw.max(0) as u16) << 1
}

// ── Driver ──────────────────────────────────────────────────────────────────

pub struct Ads1115 {
    i2c: I2c,
    channel: usize,
}

impl Ads1115 {
    /// Open I2C bus 1 and address the ADS1115 at `addr`.
    pub fn new(addr: u16, channel: usize) -> Result<Self> {
        ensure!(
            channel <= MAX_CHANNEL,
            "ADS1115 channel {channel} out of range (0-{MAX_CHANNEL})"
        );

        let mut i2c = I2c::new()?;
        i2c.set_slave_address(addr)?;

        tracing::info!(
            addr = format_args!("0x{addr:02x}"),
            channel,
            "ads1115 initialised"
        );

        Ok(Self { i2c, channel })
    }

    fn read_conversion(&mut self) -> Result<i16> {
        let config = config_for_channel(self.channel);
        self.i2c.block_write(REG_CONFIG, &config.to_be_bytes())?;

        thread::sleep(CONVERSION_WAIT);

        for _ in 0..3 {
            let mut buf = [0u8; 2];
            self.i2c.block_read(REG_CONFIG, &mut buf)?;
            if u16::from_be_bytes(buf) & OS_READY_BIT != 0 {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }

        let mut buf = [0u8; 2];
        self.i2c.block_read(REG_CONVERSION, &mut buf)?;
        Ok(i16::from_be_bytes(buf))
    }
}

impl RawAdc for Ads1115 {
    fn read_raw(&mut self) -> Result<u16> {
        Ok(widen(self.read_conversion()?))
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
