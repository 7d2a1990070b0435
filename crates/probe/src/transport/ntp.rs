//! Minimal SNTP client (RFC 4330). One request, one reply, no retries; the
//! orchestrator decides what a failure means.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use anyhow::{bail, ensure, Context, Result};
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::{timeout, Instant};
use tracing::info;

use super::TimeSync;
use crate::clock::SyncedClock;

const NTP_PORT: u16 = 123;
const PACKET_LEN: usize = 48;
/// Seconds between the NTP epoch (1900) and the unix epoch (1970).
const NTP_UNIX_OFFSET: i64 = 2_208_988_800;
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

const MODE_CLIENT: u8 = 3;
const MODE_SERVER: u8 = 4;
const VERSION: u8 = 4;

/// Client request: LI=0, VN=4, Mode=3, everything else zero.
fn request_packet() -> [u8; PACKET_LEN] {
    let mut pkt = [0u8; PACKET_LEN];
    pkt[0] = (VERSION << 3) | MODE_CLIENT;
    pkt
}

/// Server transmit time as unix seconds (fractional).
fn parse_reply(buf: &[u8]) -> Result<f64> {
    ensure!(
        buf.len() >= PACKET_LEN,
        "short SNTP reply ({} bytes)",
        buf.len()
    );

    let mode = buf[0] & 0x07;
    ensure!(mode == MODE_SERVER, "unexpected SNTP mode {mode}");

    let stratum = buf[1];
    if stratum == 0 {
        let code = String::from_utf8_lossy(&buf[12..16]);
        bail!("kiss-of-death from server ({})", code.trim_end_matches('\0'));
    }
    ensure!(stratum <= 15, "unsynchronised server (stratum {stratum})");

    let secs = u32::from_be_bytes([buf[40], buf[41], buf[42], buf[43]]);
    let frac = u32::from_be_bytes([buf[44], buf[45], buf[46], buf[47]]);
    ensure!(secs != 0, "server sent an empty transmit timestamp");

    Ok((i64::from(secs) - NTP_UNIX_OFFSET) as f64 + f64::from(frac) / 4_294_967_296.0)
}

pub struct SntpClient {
    clock: SyncedClock,
    port: u16,
}

impl SntpClient {
    pub fn new(clock: SyncedClock) -> Self {
        Self {
            clock,
            port: NTP_PORT,
        }
    }

    #[cfg(test)]
    fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Query `server` once and return its time, corrected by half the
    /// round trip.
    async fn query(&self, server: &str) -> Result<f64> {
        let addr: SocketAddr = lookup_host((server, self.port))
            .await
            .with_context(|| format!("failed to resolve {server}"))?
            .next()
            .with_context(|| format!("{server} resolved to no addresses"))?;

        let bind: SocketAddr = if addr.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind).await.context("failed to bind udp socket")?;
        socket
            .connect(addr)
            .await
            .with_context(|| format!("failed to connect to {addr}"))?;

        let sent = Instant::now();
        socket.send(&request_packet()).await.context("failed to send SNTP request")?;

        let mut buf = [0u8; 64];
        let n = timeout(REPLY_TIMEOUT, socket.recv(&mut buf))
            .await
            .with_context(|| format!("no SNTP reply from {addr} within {REPLY_TIMEOUT:?}"))?
            .context("failed to receive SNTP reply")?;
        let rtt = sent.elapsed();

        Ok(parse_reply(&buf[..n])? + rtt.as_secs_f64() / 2.0)
    }
}

impl TimeSync for SntpClient {
    async fn sync(&mut self, server: &str) -> Result<()> {
        let reference = self.query(server).await?;
        let offset = self.clock.align_to(reference.round() as i64);
        info!(server, offset_s = offset, "time synchronised");
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
