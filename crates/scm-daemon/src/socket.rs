//! Telemetry datagram sources.
//!
//! The demodulator streams SDD and MODCOD reports to two UDP ports. Reads are
//! non-blocking: the loop waits for readiness, then drains whatever is queued.

use std::io;
use std::net::SocketAddr;

use tokio::net::UdpSocket;

/// Largest datagram the demodulator emits, with headroom.
pub const MAX_DATAGRAM: usize = 2048;

#[derive(Debug)]
pub struct TelemetrySocket {
    socket: UdpSocket,
    label: &'static str,
}

impl TelemetrySocket {
    pub async fn bind(addr: SocketAddr, label: &'static str) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        tracing::info!(addr = %socket.local_addr()?, label, "telemetry socket bound");
        Ok(Self { socket, label })
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Wait until at least one datagram is queued.
    pub async fn readable(&self) -> io::Result<()> {
        self.socket.readable().await
    }

    /// One queued datagram, or `Ok(None)` when nothing is available.
    /// Any other error is a real socket failure.
    pub fn try_receive(&self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        match self.socket.try_recv_from(buf) {
            Ok((n, _peer)) => Ok(Some(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Readiness of an optional socket; never resolves for `None`.
pub async fn readable(socket: Option<&TelemetrySocket>) -> io::Result<()> {
    match socket {
        Some(socket) => socket.readable().await,
        None => std::future::pending().await,
    }
}
