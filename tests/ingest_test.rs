use ccsds_ingest::{
    anomaly_svc::AnomalySvc,
    database_svc::{telemetry, DatabaseSvc, PersistPolicy, DEFAULT_WRITE_TIMEOUT},
    health_svc::{HealthSvc, HEALTHCHECK_RESPONSE},
    ingest_svc::{send_packet, IngestSvc},
    notify_svc::{WebhookNotifier, DEFAULT_NOTIFY_TIMEOUT},
    packet::{FullPacket, PrimaryHeader, SecondaryHeader},
    packet_payload::TelemetryPayload,
};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;

async fn wait_for_rows(db: &DatabaseSvc, expected: i64) -> bool {
    let started = Instant::now();
    while started.elapsed() < Duration::from_secs(5) {
        if db.query(telemetry::count).await.unwrap() == expected {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn datagram_becomes_one_row() {
    let dir = tempfile::tempdir().unwrap();
    let db = DatabaseSvc::open(
        &dir.path().join("telemetry.db"),
        DEFAULT_WRITE_TIMEOUT,
        PersistPolicy::fail_fast(),
    )
    .unwrap();

    // no webhook: alerts fail inside their task and are only logged
    let alerts = AnomalySvc::new(WebhookNotifier::new(None, DEFAULT_NOTIFY_TIMEOUT).unwrap());
    let ingest = IngestSvc::bind("127.0.0.1:0".parse().unwrap(), db.clone(), alerts)
        .await
        .unwrap();
    let addr = ingest.local_addr().unwrap();
    tokio::spawn(ingest.run());

    // garbage first, it must not stop the loop
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client.send_to(&[0xFF; 12], addr).await.unwrap();

    let packet_id: u16 = 0x1234;
    let pkt = FullPacket::new(
        PrimaryHeader {
            packet_id,
            sequence_control: 0x5678,
            packet_length: 0x000A,
        },
        SecondaryHeader {
            timestamp: 1640995200,
            subsystem_id: 42,
        },
        TelemetryPayload::new(25.0, 85.0, 350.0, 75.0),
    );
    send_packet(addr, &pkt).await.unwrap();

    assert!(wait_for_rows(&db, 1).await);
    let row = db.query(telemetry::current).await.unwrap().unwrap();
    assert_eq!(row.apid, packet_id & 0x07FF);
    assert_eq!(row.seq_flags, 1);
    assert_eq!(row.seq_count, 0x1678);
    assert_eq!(row.subsystem_id, 42);
    assert_eq!(row.timestamp.timestamp(), 1640995200);
    assert_eq!(row.altitude, 350.0);
    assert_eq!(row.raw_packet, pkt.encode());
}

#[tokio::test]
async fn health_responder_round_trip() {
    let health = HealthSvc::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let addr = health.local_addr().unwrap();
    tokio::spawn(health.run());

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client.send_to(b" healthcheck ", addr).await.unwrap();

    let mut buf = [0u8; 64];
    let (n, _) = tokio::time::timeout(Duration::from_secs(1), client.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..n], HEALTHCHECK_RESPONSE);
}
