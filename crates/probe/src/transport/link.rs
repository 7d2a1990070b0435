//! Wireless link control. On the Pi the radio is driven through
//! NetworkManager's `nmcli`; hosts on a wired network use the static link.

use std::time::Duration;

use std::process::Stdio;

use anyhow::{bail, Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::Link;
use crate::config::{LinkKind, WifiConfig};

/// Delay after issuing the association request before polling its state.
const SETTLE_DELAY: Duration = Duration::from_secs(5);
/// Number of state polls after the settle delay.
const POLL_ATTEMPTS: u32 = 10;
const POLL_INTERVAL: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Device state
// ---------------------------------------------------------------------------

/// NetworkManager device state, from `GENERAL.STATE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Unavailable,
    Disconnected,
    /// Any of prepare / config / need-auth / ip-config / ip-check / secondaries.
    Connecting,
    Connected,
    Deactivating,
    Failed,
    Other(u32),
}

impl DeviceState {
    pub fn from_code(code: u32) -> Self {
        match code {
            20 => Self::Unavailable,
            30 => Self::Disconnected,
            40..=90 => Self::Connecting,
            100 => Self::Connected,
            110 => Self::Deactivating,
            120 => Self::Failed,
            other => Self::Other(other),
        }
    }

    /// No point polling further. A device that is still unavailable or
    /// disconnected right after the radio came up may yet associate.
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Connected | Self::Failed | Self::Other(_))
    }
}

/// Parse `nmcli -t -f GENERAL.STATE device show <iface>` output, e.g.
/// `GENERAL.STATE:100 (connected)`.
pub fn parse_device_state(output: &str) -> Result<DeviceState> {
    let line = output
        .lines()
        .find(|l| l.starts_with("GENERAL.STATE:"))
        .with_context(|| format!("no GENERAL.STATE in nmcli output: {output:?}"))?;
    let value = &line["GENERAL.STATE:".len()..];
    let code: u32 = value
        .split_whitespace()
        .next()
        .and_then(|s| s.parse().ok())
        .with_context(|| format!("unparseable device state: {value:?}"))?;
    Ok(DeviceState::from_code(code))
}

// ---------------------------------------------------------------------------
// nmcli runner
// ---------------------------------------------------------------------------

/// Runs one `nmcli` invocation and returns its stdout.
#[allow(async_fn_in_trait)]
pub trait NmcliRunner {
    /// `stdin`, when given, is written to the process followed by a newline.
    async fn run(&self, args: &[&str], stdin: Option<&str>) -> Result<String>;
}

pub struct SystemNmcli;

impl NmcliRunner for SystemNmcli {
    async fn run(&self, args: &[&str], stdin: Option<&str>) -> Result<String> {
        let mut child = Command::new("nmcli")
            .args(args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context("failed to run nmcli")?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes())
                .await
                .context("failed to write to nmcli stdin")?;
            pipe.write_all(b"\n")
                .await
                .context("failed to write to nmcli stdin")?;
        }

        let out = child
            .wait_with_output()
            .await
            .context("failed to wait for nmcli")?;
        if !out.status.success() {
            bail!(
                "nmcli {} exited with {}: {}",
                args.iter().find(|a| !a.starts_with('-')).copied().unwrap_or_default(),
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&out.stdout).into_owned())
    }
}

// ---------------------------------------------------------------------------
// nmcli link
// ---------------------------------------------------------------------------

pub struct NmcliLink<R = SystemNmcli> {
    runner: R,
    ssid: String,
    password: String,
    interface: String,
}

impl NmcliLink {
    pub fn new(ssid: &str, password: &str, interface: &str) -> Self {
        Self::with_runner(SystemNmcli, ssid, password, interface)
    }
}

impl<R: NmcliRunner> NmcliLink<R> {
    pub fn with_runner(runner: R, ssid: &str, password: &str, interface: &str) -> Self {
        Self {
            runner,
            ssid: ssid.to_string(),
            password: password.to_string(),
            interface: interface.to_string(),
        }
    }

    /// Arguments for a non-blocking association request. With a password,
    /// `--ask` makes nmcli read it from stdin so it never shows up in the
    /// process list. An empty password means an open network.
    fn connect_args(&self) -> Vec<&str> {
        let mut args = Vec::new();
        if !self.password.is_empty() {
            args.push("--ask");
        }
        args.extend(["--wait", "0", "device", "wifi", "connect", self.ssid.as_str()]);
        args.extend(["ifname", self.interface.as_str()]);
        args
    }

    async fn state(&self) -> Result<DeviceState> {
        let out = self
            .runner
            .run(&["-t", "-f", "GENERAL.STATE", "device", "show", &self.interface], None)
            .await?;
        parse_device_state(&out)
    }
}

impl<R: NmcliRunner> Link for NmcliLink<R> {
    async fn is_active(&mut self) -> bool {
        match self.state().await {
            Ok(state) => state == DeviceState::Connected,
            Err(e) => {
                debug!(iface = %self.interface, "link state unknown: {e:#}");
                false
            }
        }
    }

    async fn connect(&mut self) -> bool {
        info!(ssid = %self.ssid, iface = %self.interface, "bringing link up");

        if let Err(e) = self.runner.run(&["radio", "wifi", "on"], None).await {
            warn!("could not enable wifi radio: {e:#}");
            return false;
        }
        let secret = (!self.password.is_empty()).then_some(self.password.as_str());
        if let Err(e) = self.runner.run(&self.connect_args(), secret).await {
            warn!(ssid = %self.ssid, "association request failed: {e:#}");
            return false;
        }

        sleep(SETTLE_DELAY).await;

        for remaining in (0..POLL_ATTEMPTS).rev() {
            match self.state().await {
                Ok(s) if s.is_settled() => break,
                Ok(s) => debug!(remaining, state = ?s, "waiting for connection..."),
                Err(e) => debug!(remaining, "link state unknown: {e:#}"),
            }
            sleep(POLL_INTERVAL).await;
        }

        match self.state().await {
            Ok(DeviceState::Connected) => {
                info!(ssid = %self.ssid, "link up");
                true
            }
            Ok(state) => {
                warn!(ssid = %self.ssid, ?state, "link did not come up");
                false
            }
            Err(e) => {
                warn!("could not read link state: {e:#}");
                false
            }
        }
    }

    async fn disconnect(&mut self) {
        info!(iface = %self.interface, "dropping link");
        if let Err(e) = self
            .runner
            .run(&["device", "disconnect", &self.interface], None)
            .await
        {
            warn!("nmcli disconnect failed: {e:#}");
        }
        if let Err(e) = self.runner.run(&["radio", "wifi", "off"], None).await {
            warn!("could not disable wifi radio: {e:#}");
        }
    }
}

// ---------------------------------------------------------------------------
// Static link
// ---------------------------------------------------------------------------

/// A link that is always up (wired Ethernet, development hosts).
pub struct StaticLink;

impl Link for StaticLink {
    async fn is_active(&mut self) -> bool {
        true
    }

    async fn connect(&mut self) -> bool {
        true
    }

    async fn disconnect(&mut self) {
        debug!("static link: nothing to tear down");
    }
}

// ---------------------------------------------------------------------------
// Config-selected link
// ---------------------------------------------------------------------------

pub enum WifiLink {
    Nmcli(NmcliLink),
    Static(StaticLink),
}

impl WifiLink {
    pub fn from_config(cfg: &WifiConfig) -> Self {
        match cfg.kind {
            LinkKind::Nmcli => Self::Nmcli(NmcliLink::new(&cfg.ssid, &cfg.password, &cfg.interface)),
            LinkKind::Static => Self::Static(StaticLink),
        }
    }
}

impl Link for WifiLink {
    async fn is_active(&mut self) -> bool {
        match self {
            Self::Nmcli(l) => l.is_active().await,
            Self::Static(l) => l.is_active().await,
        }
    }

    async fn connect(&mut self) -> bool {
        match self {
            Self::Nmcli(l) => l.connect().await,
            Self::Static(l) => l.connect().await,
        }
    }

    async fn disconnect(&mut self) {
        match self {
            Self::Nmcli(l) => l.disconnect().await,
            Self::Static(l) => l.disconnect().await,
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    // -- Scripted nmcli -----------------------------------------------------

    /// Answers `device show` from a list of state codes (the last one
    /// repeats) and records every invocation.
    #[derive(Clone, Default)]
    struct ScriptedNmcli {
        states: Arc<Mutex<VecDeque<u32>>>,
        calls: Arc<Mutex<Vec<String>>>,
        stdin: Arc<Mutex<Vec<String>>>,
        refuse: Option<&'static str>,
    }

    impl ScriptedNmcli {
        fn with_states(codes: &[u32]) -> Self {
            Self {
                states: Arc::new(Mutex::new(codes.iter().copied().collect())),
                ..Self::default()
            }
        }

        fn count(&self, needle: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.contains(needle))
                .count()
        }
    }

    impl NmcliRunner for ScriptedNmcli {
        async fn run(&self, args: &[&str], stdin: Option<&str>) -> Result<String> {
            let line = args.join(" ");
            self.calls.lock().unwrap().push(line.clone());
            if let Some(input) = stdin {
                self.stdin.lock().unwrap().push(input.to_string());
            }
            if self.refuse.is_some_and(|r| line.contains(r)) {
                bail!("Error: {line} refused");
            }
            if line.contains("device show") {
                let mut states = self.states.lock().unwrap();
                let code = if states.len() > 1 {
                    states.pop_front().unwrap()
                } else {
                    states.front().copied().unwrap_or(30)
                };
                return Ok(format!("GENERAL.STATE:{code} (scripted)\n"));
            }
            Ok(String::new())
        }
    }

    fn link(nmcli: &ScriptedNmcli) -> NmcliLink<ScriptedNmcli> {
        NmcliLink::with_runner(nmcli.clone(), "garden", "hunter22", "wlan0")
    }

    // -- parse_device_state -------------------------------------------------

    #[test]
    fn parse_connected() {
        assert_eq!(
            parse_device_state("GENERAL.STATE:100 (connected)\n").unwrap(),
            DeviceState::Connected
        );
    }

    #[test]
    fn parse_disconnected() {
        assert_eq!(
            parse_device_state("GENERAL.STATE:30 (disconnected)").unwrap(),
            DeviceState::Disconnected
        );
    }

    #[test]
    fn parse_intermediate_states_are_not_settled() {
        for code in [40, 50, 60, 70, 80, 90] {
            let out = format!("GENERAL.STATE:{code} (whatever)");
            let state = parse_device_state(&out).unwrap();
            assert_eq!(state, DeviceState::Connecting);
            assert!(!state.is_settled());
        }
    }

    #[test]
    fn idle_states_keep_polling() {
        for code in [20, 30, 110] {
            assert!(!DeviceState::from_code(code).is_settled(), "code {code}");
        }
    }

    #[test]
    fn connected_failed_and_unknown_are_settled() {
        for code in [100, 120, 10] {
            assert!(DeviceState::from_code(code).is_settled(), "code {code}");
        }
    }

    #[test]
    fn parse_unknown_code_kept() {
        assert_eq!(
            parse_device_state("GENERAL.STATE:10 (unmanaged)").unwrap(),
            DeviceState::Other(10)
        );
    }

    #[test]
    fn parse_missing_field_fails() {
        assert!(parse_device_state("GENERAL.DEVICE:wlan0").is_err());
        assert!(parse_device_state("").is_err());
    }

    #[test]
    fn parse_garbage_code_fails() {
        assert!(parse_device_state("GENERAL.STATE:abc").is_err());
    }

    // -- connect_args -------------------------------------------------------

    #[test]
    fn connect_args_keep_password_off_the_command_line() {
        let link = NmcliLink::new("garden", "hunter22", "wlan0");
        let args = link.connect_args();
        assert_eq!(
            args,
            vec!["--ask", "--wait", "0", "device", "wifi", "connect", "garden", "ifname", "wlan0"]
        );
        assert!(!args.contains(&"hunter22"));
    }

    #[test]
    fn connect_args_open_network() {
        let link = NmcliLink::new("cafe", "", "wlan1");
        assert_eq!(
            link.connect_args(),
            vec!["--wait", "0", "device", "wifi", "connect", "cafe", "ifname", "wlan1"]
        );
    }

    // -- connect ------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn connect_waits_through_disconnected_until_connected() {
        let nmcli = ScriptedNmcli::with_states(&[30, 30, 100]);
        let mut link = link(&nmcli);

        let start = Instant::now();
        assert!(link.connect().await);

        // Settle, then two unsettled polls a second apart.
        assert_eq!(start.elapsed(), SETTLE_DELAY + POLL_INTERVAL * 2);
        // Three polls plus the final check.
        assert_eq!(nmcli.count("device show"), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_gives_up_after_full_poll_window() {
        let nmcli = ScriptedNmcli::with_states(&[20]);
        let mut link = link(&nmcli);

        let start = Instant::now();
        assert!(!link.connect().await);

        assert_eq!(start.elapsed(), Duration::from_secs(15));
        assert_eq!(nmcli.count("device show"), POLL_ATTEMPTS as usize + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_stops_polling_on_failure() {
        let nmcli = ScriptedNmcli::with_states(&[50, 120]);
        let mut link = link(&nmcli);

        let start = Instant::now();
        assert!(!link.connect().await);

        assert_eq!(start.elapsed(), SETTLE_DELAY + POLL_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_sends_password_on_stdin_only() {
        let nmcli = ScriptedNmcli::with_states(&[100]);
        let mut link = link(&nmcli);

        assert!(link.connect().await);

        assert_eq!(*nmcli.stdin.lock().unwrap(), vec!["hunter22"]);
        let calls = nmcli.calls.lock().unwrap();
        assert_eq!(calls[0], "radio wifi on");
        assert!(calls.iter().all(|c| !c.contains("hunter22")));
    }

    #[tokio::test(start_paused = true)]
    async fn refused_association_fails_without_waiting() {
        let nmcli = ScriptedNmcli {
            refuse: Some("wifi connect"),
            ..ScriptedNmcli::with_states(&[100])
        };
        let mut link = link(&nmcli);

        let start = Instant::now();
        assert!(!link.connect().await);

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(nmcli.count("device show"), 0);
    }

    #[tokio::test]
    async fn is_active_only_when_connected() {
        let nmcli = ScriptedNmcli::with_states(&[80, 100]);
        let mut link = link(&nmcli);
        assert!(!link.is_active().await);
        assert!(link.is_active().await);
    }

    #[tokio::test]
    async fn disconnect_drops_device_then_radio() {
        let nmcli = ScriptedNmcli::default();
        let mut link = link(&nmcli);

        link.disconnect().await;

        assert_eq!(
            *nmcli.calls.lock().unwrap(),
            vec!["device disconnect wlan0", "radio wifi off"]
        );
    }

    // -- StaticLink / WifiLink ---------------------------------------------

    #[tokio::test]
    async fn static_link_is_always_up() {
        let mut link = WifiLink::from_config(&WifiConfig {
            kind: LinkKind::Static,
            ..WifiConfig::default()
        });
        assert!(link.is_active().await);
        link.disconnect().await;
        assert!(link.is_active().await);
        assert!(link.connect().await);
    }

    #[test]
    fn nmcli_kind_builds_nmcli_link() {
        let link = WifiLink::from_config(&WifiConfig {
            ssid: "garden".into(),
            ..WifiConfig::default()
        });
        assert!(matches!(link, WifiLink::Nmcli(ref l) if l.interface == "wlan0"));
    }
}
