//! Status LED lit while the sensor is being read. The `gpio` feature gates
//! the real rppal pin; otherwise the indicator only logs.

use anyhow::Result;

#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, OutputPin};

use crate::config::IndicatorConfig;

pub trait StatusLed {
    fn set(&mut self, on: bool);
}

impl<L: StatusLed + ?Sized> StatusLed for Box<L> {
    fn set(&mut self, on: bool) {
        (**self).set(on)
    }
}

/// Indicator with no hardware behind it.
pub struct LogLed;

impl StatusLed for LogLed {
    fn set(&mut self, on: bool) {
        tracing::trace!(on, "status led");
    }
}

#[cfg(feature = "gpio")]
pub struct GpioLed {
    pin: OutputPin,
}

#[cfg(feature = "gpio")]
impl GpioLed {
    pub fn new(pin_num: u8) -> Result<Self> {
        let mut pin = Gpio::new()?.get(pin_num)?.into_output();
        pin.set_low();
        Ok(Self { pin })
    }
}

#[cfg(feature = "gpio")]
impl StatusLed for GpioLed {
    fn set(&mut self, on: bool) {
        if on {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        }
    }
}

#[cfg(feature = "gpio")]
pub fn build(cfg: &IndicatorConfig) -> Result<Box<dyn StatusLed>> {
    match cfg.gpio {
        Some(pin) => {
            tracing::info!(pin, "status led on gpio");
            Ok(Box::new(GpioLed::new(pin)?))
        }
        None => Ok(Box::new(LogLed)),
    }
}

#[cfg(not(feature = "gpio"))]
pub fn build(cfg: &IndicatorConfig) -> Result<Box<dyn StatusLed>> {
    if let Some(pin) = cfg.gpio {
        tracing::warn!(pin, "built without `gpio` feature; status led is log-only");
    }
    Ok(Box::new(LogLed))
}
