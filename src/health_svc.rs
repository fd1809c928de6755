use std::{io, net::SocketAddr};
use tokio::net::UdpSocket;
use tracing::{info, warn};

pub const HEALTHCHECK_REQUEST: &str = "healthcheck";
pub const HEALTHCHECK_RESPONSE: &[u8] = b"healthy";

/// Liveness responder, shares nothing with the ingestion loop.
pub struct HealthSvc {
    socket: UdpSocket,
}

impl HealthSvc {
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        Ok(Self {
            socket: UdpSocket::bind(addr).await?,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub async fn run(self) {
        match self.local_addr() {
            Ok(addr) => info!("health_svc: listening for healthcheck packets on {}", addr),
            Err(e) => warn!("health_svc: running on unknown address: {}", e),
        }

        let mut buf = vec![0u8; 1024];
        loop {
            let (n, peer) = match self.socket.recv_from(&mut buf).await {
                Ok(recv) => recv,
                Err(e) => {
                    warn!("health_svc: error reading healthcheck request: {}", e);
                    continue;
                }
            };

            let message = String::from_utf8_lossy(&buf[..n]);
            let message = message.trim();
            if message != HEALTHCHECK_REQUEST {
                warn!("health_svc: ignoring message {:?} from {}", message, peer);
                continue;
            }

            if let Err(e) = self.socket.send_to(HEALTHCHECK_RESPONSE, peer).await {
                warn!("health_svc: error responding to {}: {}", peer, e);
            }
        }
    }
}
