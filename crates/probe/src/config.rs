//! TOML config file loading, environment overrides, and validation.

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::buffer::DEFAULT_CAPACITY;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub wifi: WifiConfig,
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub sampling: SamplingConfig,
    #[serde(default)]
    pub ntp: NtpConfig,
    #[serde(default)]
    pub sensor: SensorConfig,
    #[serde(default)]
    pub indicator: IndicatorConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    /// Wi-Fi managed through NetworkManager's `nmcli`.
    #[default]
    Nmcli,
    /// Wired or otherwise always-on network; nothing to bring up.
    Static,
}

#[derive(Debug, Deserialize)]
pub struct WifiConfig {
    #[serde(default)]
    pub kind: LinkKind,
    #[serde(default)]
    pub ssid: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_interface")]
    pub interface: String,
}

#[derive(Debug, Deserialize)]
pub struct MqttConfig {
    pub broker: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub client_id: String,
    pub topic: String,
    #[serde(default = "default_keep_alive_s")]
    pub keep_alive_s: u64,
}

#[derive(Debug, Deserialize)]
pub struct SamplingConfig {
    #[serde(default = "default_interval_s")]
    pub interval_s: u64,
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
}

#[derive(Debug, Deserialize)]
pub struct NtpConfig {
    #[serde(default = "default_ntp_server")]
    pub server: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    #[default]
    Sim,
    Adc,
}

#[derive(Debug, Deserialize)]
pub struct SensorConfig {
    #[serde(default)]
    pub kind: SensorKind,
    /// Simulator profile (`drying`, `stable`, `flaky`, `wet`).
    #[serde(default = "default_scenario")]
    pub scenario: String,
    #[serde(default = "default_i2c_address")]
    #[cfg_attr(not(feature = "adc"), allow(dead_code))]
    pub i2c_address: u16,
    #[serde(default)]
    pub channel: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct IndicatorConfig {
    /// BCM pin driving the status LED. Unset = log only.
    pub gpio: Option<u8>,
}

fn default_interface() -> String {
    "wlan0".to_string()
}
fn default_mqtt_port() -> u16 {
    1883
}
fn default_keep_alive_s() -> u64 {
    60
}
fn default_interval_s() -> u64 {
    30
}
fn default_buffer_capacity() -> usize {
    DEFAULT_CAPACITY
}
fn default_ntp_server() -> String {
    "pool.ntp.org".to_string()
}
fn default_scenario() -> String {
    "drying".to_string()
}
fn default_i2c_address() -> u16 {
    0x48
}

impl Default for WifiConfig {
    fn default() -> Self {
        Self {
            kind: LinkKind::default(),
            ssid: String::new(),
            password: String::new(),
            interface: default_interface(),
        }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            interval_s: default_interval_s(),
            buffer_capacity: default_buffer_capacity(),
        }
    }
}

impl Default for NtpConfig {
    fn default() -> Self {
        Self {
            server: default_ntp_server(),
        }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            kind: SensorKind::default(),
            scenario: default_scenario(),
            i2c_address: default_i2c_address(),
            channel: 0,
        }
    }
}

impl MqttConfig {
    /// Client identifier as sent in CONNECT: the configured id, hex-encoded.
    pub fn wire_client_id(&self) -> String {
        self.client_id.bytes().map(|b| format!("{b:02x}")).collect()
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Highest single-ended input on the ADS1115.
const ADS1115_MAX_CHANNEL: usize = 3;

/// rumqttc rejects keep-alive intervals shorter than this.
const MIN_KEEP_ALIVE_S: u64 = 5;
/// Keep-alive is a 16-bit field in CONNECT.
const MAX_KEEP_ALIVE_S: u64 = u16::MAX as u64;
/// About three and a half days of backlog at one sample a minute.
const MAX_BUFFER_CAPACITY: usize = 5_000;

impl Config {
    /// Validate the whole file. Returns `Ok(())` or an error describing every
    /// violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_wifi(&mut errors);
        self.validate_mqtt(&mut errors);
        self.validate_sampling(&mut errors);
        self.validate_sensor(&mut errors);

        if self.ntp.server.trim().is_empty() {
            errors.push("ntp.server is empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_wifi(&self, errors: &mut Vec<String>) {
        if self.wifi.kind == LinkKind::Nmcli {
            if self.wifi.ssid.trim().is_empty() {
                errors.push("wifi.ssid is empty".to_string());
            }
            if self.wifi.interface.trim().is_empty() {
                errors.push("wifi.interface is empty".to_string());
            }
        }
    }

    fn validate_mqtt(&self, errors: &mut Vec<String>) {
        let m = &self.mqtt;
        if m.broker.trim().is_empty() {
            errors.push("mqtt.broker is empty".to_string());
        }
        if m.port == 0 {
            errors.push("mqtt.port must be non-zero".to_string());
        }
        if m.client_id.trim().is_empty() {
            errors.push("mqtt.client_id is empty".to_string());
        }
        if m.topic.trim().is_empty() {
            errors.push("mqtt.topic is empty".to_string());
        } else if m.topic.contains(['+', '#']) {
            errors.push(format!(
                "mqtt.topic '{}' contains a wildcard; publish topics must be literal",
                m.topic
            ));
        }
        if m.keep_alive_s < MIN_KEEP_ALIVE_S {
            errors.push(format!(
                "mqtt.keep_alive_s must be at least {MIN_KEEP_ALIVE_S}, got {}",
                m.keep_alive_s
            ));
        }
        if m.keep_alive_s > MAX_KEEP_ALIVE_S {
            errors.push(format!(
                "mqtt.keep_alive_s must be at most {MAX_KEEP_ALIVE_S}, got {}",
                m.keep_alive_s
            ));
        }
        if m.username.is_empty() && !m.password.is_empty() {
            errors.push("mqtt.password is set but mqtt.username is empty".to_string());
        }
    }

    fn validate_sampling(&self, errors: &mut Vec<String>) {
        if self.sampling.interval_s == 0 {
            errors.push("sampling.interval_s must be positive, got 0".to_string());
        }
        if self.sampling.buffer_capacity == 0 {
            errors.push("sampling.buffer_capacity must be positive, got 0".to_string());
        } else if self.sampling.buffer_capacity > MAX_BUFFER_CAPACITY {
            errors.push(format!(
                "sampling.buffer_capacity must be at most {MAX_BUFFER_CAPACITY}, got {}",
                self.sampling.buffer_capacity
            ));
        }
    }

    fn validate_sensor(&self, errors: &mut Vec<String>) {
        if self.sensor.kind == SensorKind::Adc && self.sensor.channel > ADS1115_MAX_CHANNEL {
            errors.push(format!(
                "sensor.channel {} out of range (0-{ADS1115_MAX_CHANNEL})",
                self.sensor.channel
            ));
        }
    }

    /// Apply `MQTT_HOST`, `MQTT_PORT` and `SAMPLE_EVERY_S` on top of the file.
    /// Unparseable numeric overrides are ignored with a warning.
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(host) = var("MQTT_HOST") {
            self.mqtt.broker = host;
        }
        if let Some(raw) = var("MQTT_PORT") {
            match raw.parse() {
                Ok(port) => self.mqtt.port = port,
                Err(_) => tracing::warn!(value = %raw, "ignoring unparseable MQTT_PORT"),
            }
        }
        if let Some(raw) = var("SAMPLE_EVERY_S") {
            match raw.parse() {
                Ok(secs) => self.sampling.interval_s = secs,
                Err(_) => tracing::warn!(value = %raw, "ignoring unparseable SAMPLE_EVERY_S"),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, override from the environment, and validate a config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let mut config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config.apply_overrides(|key| std::env::var(key).ok());
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;

    tracing::info!(
        path,
        broker = %config.mqtt.broker,
        port = config.mqtt.port,
        topic = %config.mqtt.topic,
        interval_s = config.sampling.interval_s,
        "config loaded"
    );

    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const MINIMAL: &str = r#"
[wifi]
ssid = "garden"
password = "hunter22"

[mqtt]
broker = "192.168.1.10"
username = "probe"
password = "secret"
client_id = "probe-01"
topic = "garden/bed1/moisture"

[ntp]
server = "time.cloudflare.com"
"#;

    fn valid_config() -> Config {
        toml::from_str(MINIMAL).unwrap()
    }

    /// Assert validation fails and the error message contains `needle`.
    fn assert_validation_err(cfg: &Config, needle: &str) {
        let err = cfg.validate().unwrap_err();
        let msg = format!("{err:#}");
        assert!(
            msg.contains(needle),
            "expected error containing {needle:?}, got: {msg}"
        );
    }

    // -- Parsing ----------------------------------------------------------

    #[test]
    fn shipped_example_config_is_valid() {
        let cfg: Config = toml::from_str(include_str!("../probe.toml")).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.wifi.kind, LinkKind::Nmcli);
        assert_eq!(cfg.sensor.kind, SensorKind::Sim);
        assert_eq!(cfg.sensor.i2c_address, 0x48);
        assert!(cfg.indicator.gpio.is_none());
    }

    #[test]
    fn parse_minimal_config_fills_defaults() {
        let cfg = valid_config();
        assert_eq!(cfg.wifi.kind, LinkKind::Nmcli);
        assert_eq!(cfg.wifi.interface, "wlan0");
        assert_eq!(cfg.mqtt.port, 1883);
        assert_eq!(cfg.mqtt.keep_alive_s, 60);
        assert_eq!(cfg.sampling.interval_s, 30);
        assert_eq!(cfg.sampling.buffer_capacity, 100);
        assert_eq!(cfg.ntp.server, "time.cloudflare.com");
        assert_eq!(cfg.sensor.kind, SensorKind::Sim);
        assert_eq!(cfg.sensor.i2c_address, 0x48);
        assert!(cfg.indicator.gpio.is_none());
    }

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
[wifi]
kind = "static"

[mqtt]
broker = "broker.local"
port = 1884
client_id = "probe-02"
topic = "tele/probe-02/moisture"
keep_alive_s = 30

[sampling]
interval_s = 300
buffer_capacity = 20

[sensor]
kind = "adc"
i2c_address = 0x49
channel = 2

[indicator]
gpio = 25
"#;
        let cfg: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.wifi.kind, LinkKind::Static);
        assert_eq!(cfg.mqtt.port, 1884);
        assert_eq!(cfg.sampling.interval_s, 300);
        assert_eq!(cfg.sampling.buffer_capacity, 20);
        assert_eq!(cfg.sensor.kind, SensorKind::Adc);
        assert_eq!(cfg.sensor.i2c_address, 0x49);
        assert_eq!(cfg.sensor.channel, 2);
        assert_eq!(cfg.indicator.gpio, Some(25));
        assert_eq!(cfg.ntp.server, "pool.ntp.org");
        cfg.validate().unwrap();
    }

    #[test]
    fn missing_mqtt_section_fails_to_parse() {
        assert!(toml::from_str::<Config>("[wifi]\nssid = \"x\"\n").is_err());
    }

    #[test]
    fn unknown_link_kind_fails_to_parse() {
        let toml_str = MINIMAL.replace("[wifi]", "[wifi]\nkind = \"carrier-pigeon\"");
        assert!(toml::from_str::<Config>(&toml_str).is_err());
    }

    // -- Validation -------------------------------------------------------

    #[test]
    fn valid_config_passes() {
        valid_config().validate().unwrap();
    }

    #[test]
    fn nmcli_requires_ssid() {
        let mut cfg = valid_config();
        cfg.wifi.ssid = " ".into();
        assert_validation_err(&cfg, "wifi.ssid is empty");
    }

    #[test]
    fn static_link_needs_no_ssid() {
        let mut cfg = valid_config();
        cfg.wifi.kind = LinkKind::Static;
        cfg.wifi.ssid = "".into();
        cfg.validate().unwrap();
    }

    #[test]
    fn empty_broker_rejected() {
        let mut cfg = valid_config();
        cfg.mqtt.broker = "".into();
        assert_validation_err(&cfg, "mqtt.broker is empty");
    }

    #[test]
    fn zero_port_rejected() {
        let mut cfg = valid_config();
        cfg.mqtt.port = 0;
        assert_validation_err(&cfg, "mqtt.port must be non-zero");
    }

    #[test]
    fn wildcard_topic_rejected() {
        let mut cfg = valid_config();
        cfg.mqtt.topic = "garden/+/moisture".into();
        assert_validation_err(&cfg, "contains a wildcard");
        cfg.mqtt.topic = "garden/#".into();
        assert_validation_err(&cfg, "contains a wildcard");
    }

    #[test]
    fn short_keep_alive_rejected() {
        let mut cfg = valid_config();
        cfg.mqtt.keep_alive_s = 2;
        assert_validation_err(&cfg, "keep_alive_s must be at least 5, got 2");
    }

    #[test]
    fn keep_alive_beyond_16_bits_rejected() {
        let mut cfg = valid_config();
        cfg.mqtt.keep_alive_s = 65_535;
        cfg.validate().unwrap();
        cfg.mqtt.keep_alive_s = 65_536;
        assert_validation_err(&cfg, "keep_alive_s must be at most 65535, got 65536");
    }

    #[test]
    fn password_without_username_rejected() {
        let mut cfg = valid_config();
        cfg.mqtt.username = "".into();
        assert_validation_err(&cfg, "mqtt.password is set but mqtt.username is empty");
    }

    #[test]
    fn anonymous_broker_allowed() {
        let mut cfg = valid_config();
        cfg.mqtt.username = "".into();
        cfg.mqtt.password = "".into();
        cfg.validate().unwrap();
    }

    #[test]
    fn zero_interval_rejected() {
        let mut cfg = valid_config();
        cfg.sampling.interval_s = 0;
        assert_validation_err(&cfg, "sampling.interval_s must be positive");
    }

    #[test]
    fn zero_capacity_rejected() {
        let mut cfg = valid_config();
        cfg.sampling.buffer_capacity = 0;
        assert_validation_err(&cfg, "sampling.buffer_capacity must be positive");
    }

    #[test]
    fn oversized_capacity_rejected() {
        let mut cfg: Config = toml::from_str(&format!(
            "{MINIMAL}\n[sampling]\nbuffer_capacity = {}\n",
            i64::MAX
        ))
        .unwrap();
        assert_validation_err(&cfg, "sampling.buffer_capacity must be at most 5000");

        cfg.sampling.buffer_capacity = MAX_BUFFER_CAPACITY;
        cfg.validate().unwrap();
    }

    #[test]
    fn adc_channel_out_of_range_rejected() {
        let mut cfg = valid_config();
        cfg.sensor.kind = SensorKind::Adc;
        cfg.sensor.channel = 4;
        assert_validation_err(&cfg, "sensor.channel 4 out of range");
    }

    #[test]
    fn multiple_errors_collected() {
        let mut cfg = valid_config();
        cfg.wifi.ssid = "".into();
        cfg.mqtt.topic = "".into();
        cfg.ntp.server = "".into();

        let msg = format!("{:#}", cfg.validate().unwrap_err());
        assert!(msg.contains("3 errors"), "wrong count in: {msg}");
        assert!(msg.contains("wifi.ssid is empty"), "missing ssid error in: {msg}");
        assert!(msg.contains("mqtt.topic is empty"), "missing topic error in: {msg}");
        assert!(msg.contains("ntp.server is empty"), "missing ntp error in: {msg}");
    }

    // -- Environment overrides --------------------------------------------

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("MQTT_HOST", "10.0.0.5"),
            ("MQTT_PORT", "2883"),
            ("SAMPLE_EVERY_S", "5"),
        ]
        .into_iter()
        .collect();

        let mut cfg = valid_config();
        cfg.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.mqtt.broker, "10.0.0.5");
        assert_eq!(cfg.mqtt.port, 2883);
        assert_eq!(cfg.sampling.interval_s, 5);
    }

    #[test]
    fn bad_numeric_override_ignored() {
        let mut cfg = valid_config();
        cfg.apply_overrides(|k| (k == "MQTT_PORT").then(|| "not-a-port".to_string()));
        assert_eq!(cfg.mqtt.port, 1883);
    }

    // -- Client id --------------------------------------------------------

    #[test]
    fn client_id_is_hex_encoded_on_the_wire() {
        let cfg = valid_config();
        assert_eq!(cfg.mqtt.wire_client_id(), "70726f62652d3031");
    }

    // -- Load -------------------------------------------------------------

    #[test]
    fn load_missing_file_reports_path() {
        let err = load("/nonexistent/probe.toml").unwrap_err();
        assert!(format!("{err:#}").contains("failed to read config: /nonexistent/probe.toml"));
    }
}
