//! Gateway liveness probe.
//!
//! A gateway is alive iff something accepts TCP connections on its port.
//! This is checked before any lock logic so a running gateway is never
//! disturbed by stale-lock cleanup.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// Result of a liveness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Listening,
    NotListening,
}

impl Liveness {
    pub fn is_listening(&self) -> bool {
        matches!(self, Liveness::Listening)
    }
}

/// Probe the gateway port with a bounded connection attempt.
pub async fn probe(port: u16, check_timeout: Duration) -> Liveness {
    let addr = SocketAddrV4::new(Ipv4Addr::LOCALHOST, port);

    match timeout(check_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(_stream)) => {
            debug!(port, "liveness probe succeeded");
            Liveness::Listening
        }
        Ok(Err(e)) => {
            debug!(port, error = %e, "liveness probe failed: connection error");
            Liveness::NotListening
        }
        Err(_) => {
            debug!(port, "liveness probe failed: timeout");
            Liveness::NotListening
        }
    }
}

/// Poll the port until it accepts connections or `deadline` elapses.
pub async fn wait_until_listening(port: u16, deadline: Duration, check_timeout: Duration) -> bool {
    let start = Instant::now();
    let interval = Duration::from_millis(250);

    loop {
        if probe(port, check_timeout).await.is_listening() {
            debug!(port, elapsed_ms = start.elapsed().as_millis() as u64, "gateway is listening");
            return true;
        }
        if start.elapsed() >= deadline {
            return false;
        }
        tokio::time::sleep(interval).await;
    }
}
