use std::{
    io,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
};
use tokio::net::UdpSocket;
use tracing::{debug, error, info, warn};

use super::anomaly_svc::AnomalySvc;
use super::database_svc::DatabaseSvc;
use super::error::{IngestError, PersistError};
use super::notify_svc::Notifier;
use super::packet::{self, FullPacket};

const MAX_DATAGRAM_LEN: usize = 2048;

/// Receives telemetry datagrams one at a time, hands each decoded packet to
/// the anomaly task and writes it to the store before the next receive.
pub struct IngestSvc<N> {
    socket: UdpSocket,
    pub database: DatabaseSvc,
    pub alerts: AnomalySvc<N>,
}

impl<N: Notifier> IngestSvc<N> {
    pub async fn bind(addr: SocketAddr, database: DatabaseSvc, alerts: AnomalySvc<N>) -> Result<Self, IngestError> {
        Ok(Self {
            socket: UdpSocket::bind(addr).await?,
            database,
            alerts,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Only returns when a write fails past the persistence policy.
    pub async fn run(self) -> Result<(), IngestError> {
        info!("ingest_svc: listening for telemetry packets on {}", self.local_addr()?);

        // one spare byte tells an oversized datagram apart from a full one
        let mut buf = vec![0u8; MAX_DATAGRAM_LEN + 1];
        loop {
            let (n, peer) = match self.socket.recv_from(&mut buf).await {
                Ok(recv) => recv,
                Err(e) => {
                    warn!("ingest_svc: error reading packet: {}", e);
                    continue;
                }
            };
            if n > MAX_DATAGRAM_LEN {
                warn!(
                    "ingest_svc: dropping datagram from {}: larger than {} bytes",
                    peer, MAX_DATAGRAM_LEN
                );
                continue;
            }
            debug!("ingest_svc: received {} bytes from {}", n, peer);

            self.handle(&buf[..n]).await?;
        }
    }

    /// Decode failures and rows the store rejects drop the datagram. The
    /// sender never gets a reply. Only store-level failures are returned.
    pub async fn handle(&self, datagram: &[u8]) -> Result<(), PersistError> {
        let pkt = match packet::decode(datagram) {
            Ok(pkt) => pkt,
            Err(e) => {
                warn!("ingest_svc: dropping packet: {}", e);
                return Ok(());
            }
        };
        debug!(
            "ingest_svc: decoded packet apid {} seq {}",
            pkt.apid(),
            pkt.primary.seq_count()
        );

        // not awaited, its outcome never reaches this loop
        drop(self.alerts.submit(pkt.clone()));

        match self.database.persist(&pkt).await {
            Ok(()) => {}
            Err(e @ PersistError::ConstraintViolation(_)) => {
                error!(
                    "ingest_svc: dropping packet (apid {}, seq {}): {}",
                    pkt.apid(),
                    pkt.primary.seq_count(),
                    e
                );
                return Ok(());
            }
            Err(e) => return Err(e),
        }
        info!(
            "ingest_svc: packet written to database (apid {}, seq {})",
            pkt.apid(),
            pkt.primary.seq_count()
        );

        Ok(())
    }
}

/// Sends one encoded packet to an ingestion listener.
pub async fn send_packet(target: SocketAddr, pkt: &FullPacket) -> io::Result<usize> {
    let any = match target {
        SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    let socket = UdpSocket::bind(SocketAddr::new(any, 0)).await?;
    socket.send_to(&pkt.encode(), target).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_svc::{telemetry, PersistPolicy, DEFAULT_WRITE_TIMEOUT};
    use crate::error::NotifyError;
    use crate::packet::{PrimaryHeader, SecondaryHeader, PACKET_LEN};
    use crate::packet_payload::TelemetryPayload;
    use std::time::Duration;
    use tokio::{sync::mpsc, time};

    struct ChannelNotifier(mpsc::UnboundedSender<String>);

    impl Notifier for ChannelNotifier {
        async fn notify(&self, message: String) -> Result<(), NotifyError> {
            let _ = self.0.send(message);
            Err(NotifyError::MissingEndpoint)
        }
    }

    async fn svc() -> (IngestSvc<ChannelNotifier>, mpsc::UnboundedReceiver<String>) {
        svc_with_timeout(DEFAULT_WRITE_TIMEOUT).await
    }

    async fn svc_with_timeout(
        write_timeout: Duration,
    ) -> (IngestSvc<ChannelNotifier>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let db = DatabaseSvc::open_in_memory(write_timeout, PersistPolicy::fail_fast()).unwrap();
        let svc = IngestSvc::bind(
            "127.0.0.1:0".parse().unwrap(),
            db,
            AnomalySvc::new(ChannelNotifier(tx)),
        )
        .await
        .unwrap();
        (svc, rx)
    }

    fn packet(payload: TelemetryPayload) -> FullPacket {
        FullPacket::new(
            PrimaryHeader::telemetry(0x155, 3, 9),
            SecondaryHeader {
                timestamp: 1640995200,
                subsystem_id: 7,
            },
            payload,
        )
    }

    #[tokio::test]
    async fn undecodable_datagrams_are_dropped() {
        let (svc, _rx) = svc().await;
        svc.handle(&[0u8; 10]).await.unwrap();
        svc.handle(&[0u8; PACKET_LEN - 1]).await.unwrap();

        assert_eq!(svc.database.query(telemetry::count).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn anomalous_packet_is_stored_and_alerted() {
        let (svc, mut rx) = svc().await;
        let pkt = packet(TelemetryPayload::new(25.0, 85.0, 350.0, 75.0));

        // alert delivery fails inside the task, the write still succeeds
        svc.handle(&pkt.encode()).await.unwrap();

        assert_eq!(svc.database.query(telemetry::count).await.unwrap(), 1);
        let message = rx.recv().await.unwrap();
        assert!(message.contains("APID[341]"));
        assert!(message.contains("Altitude[350.00km < 400.00km]"));
    }

    fn out_of_range_packet() -> FullPacket {
        FullPacket::new(
            PrimaryHeader::telemetry(1, 3, 0),
            SecondaryHeader {
                timestamp: u64::MAX,
                subsystem_id: 0,
            },
            TelemetryPayload::new(25.0, 85.0, 500.0, 75.0),
        )
    }

    async fn wait_for_rows(db: &DatabaseSvc, expected: i64) -> i64 {
        let mut rows = 0;
        for _ in 0..100 {
            rows = db.query(telemetry::count).await.unwrap();
            if rows == expected {
                break;
            }
            time::sleep(Duration::from_millis(20)).await;
        }
        rows
    }

    #[tokio::test]
    async fn rejected_row_is_dropped() {
        let (svc, _rx) = svc().await;

        svc.handle(&out_of_range_packet().encode()).await.unwrap();
        svc.handle(&packet(TelemetryPayload::new(25.0, 85.0, 500.0, 75.0)).encode())
            .await
            .unwrap();

        assert_eq!(svc.database.query(telemetry::count).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn store_failure_is_returned() {
        let timeout = Duration::from_millis(30);
        let (svc, _rx) = svc_with_timeout(timeout).await;

        // a long read holds the connection past the write timeout
        let busy = svc.database.clone();
        let reader = tokio::spawn(async move {
            busy.query(|_| {
                std::thread::sleep(Duration::from_millis(300));
                Ok(())
            })
            .await
        });
        time::sleep(Duration::from_millis(50)).await;

        let err = svc
            .handle(&packet(TelemetryPayload::new(25.0, 85.0, 500.0, 75.0)).encode())
            .await
            .unwrap_err();
        assert!(matches!(err, PersistError::Timeout(t) if t == timeout));
        reader.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn loop_keeps_serving_after_dropped_datagrams() {
        let (svc, _rx) = svc().await;
        let addr = svc.local_addr().unwrap();
        let db = svc.database.clone();
        let task = tokio::spawn(svc.run());

        let good = packet(TelemetryPayload::new(25.0, 85.0, 500.0, 75.0));
        let mut oversized = good.encode();
        oversized.resize(MAX_DATAGRAM_LEN + 100, 0);

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.send_to(&oversized, addr).await.unwrap();
        sender.send_to(&out_of_range_packet().encode(), addr).await.unwrap();
        sender.send_to(&good.encode(), addr).await.unwrap();

        assert_eq!(wait_for_rows(&db, 1).await, 1);
        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(db.query(telemetry::count).await.unwrap(), 1);
        assert!(!task.is_finished());
        task.abort();
    }
}
