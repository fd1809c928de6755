use anyhow::{Context, Result};
use clap::Parser;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::{signal, spawn};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ccsds_ingest::{
    anomaly_svc::AnomalySvc,
    config::{Cli, Command, Config, EmitArgs, QueryArgs, QueryKind},
    database_svc::{
        telemetry::{self, TimeWindow, ANOMALY_LIMIT, LIST_LIMIT},
        DatabaseSvc,
    },
    health_svc::HealthSvc,
    ingest_svc::{self, IngestSvc},
    notify_svc::WebhookNotifier,
    packet::{FullPacket, PrimaryHeader, SecondaryHeader},
    packet_payload::TelemetryPayload,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ccsds_ingest=info")),
        )
        .init();

    match Cli::parse().command {
        Command::Serve(args) => serve(Config::try_from(args)?).await,
        Command::Query(args) => query(args).await,
        Command::Emit(args) => emit(args).await,
    }
}

async fn serve(config: Config) -> Result<()> {
    let database = DatabaseSvc::open(&config.database_path, config.persist_timeout, config.persist_policy)
        .context("unable to open telemetry database")?;

    if config.webhook_url.is_none() {
        warn!("no webhook URL configured, anomaly alerts will not be delivered");
    }
    let notifier = WebhookNotifier::new(config.webhook_url.clone(), config.notify_timeout)
        .context("failed to build webhook client")?;
    let alerts = AnomalySvc::new(notifier);

    let health = HealthSvc::bind(config.healthcheck_addr)
        .await
        .context("failed to start healthcheck listener")?;
    let ingest = IngestSvc::bind(config.ingestion_addr, database, alerts)
        .await
        .context("failed to start telemetry listener")?;

    // spawn the healthcheck responder, ingestion runs on this task
    spawn(health.run());

    tokio::select! {
        res = ingest.run() => {
            let e = match res {
                Ok(()) => anyhow::anyhow!("ingestion loop exited"),
                Err(e) => e.into(),
            };
            error!("ingestion stopped: {}", e);
            Err(e)
        }
        res = signal::ctrl_c() => {
            res.context("failed to listen for shutdown signal")?;
            info!("shutdown signal received, abandoning in-flight alerts");
            Ok(())
        }
    }
}

async fn query(args: QueryArgs) -> Result<()> {
    let database = DatabaseSvc::open_read_only(&args.database.path)
        .with_context(|| format!("unable to open telemetry database {}", args.database.path.display()))?;
    let window = TimeWindow::new(args.start, args.end);

    let out = match args.kind {
        QueryKind::Current => serde_json::to_string_pretty(&database.query(telemetry::current).await?)?,
        QueryKind::List => {
            let limit = args.limit.unwrap_or(LIST_LIMIT);
            serde_json::to_string_pretty(&database.query(move |conn| telemetry::list(conn, &window, limit)).await?)?
        }
        QueryKind::Aggregate => serde_json::to_string_pretty(
            &database.query(move |conn| telemetry::aggregate(conn, &window)).await?,
        )?,
        QueryKind::Anomalies => {
            let limit = args.limit.unwrap_or(ANOMALY_LIMIT);
            serde_json::to_string_pretty(
                &database
                    .query(move |conn| telemetry::anomalies(conn, &window, limit))
                    .await?,
            )?
        }
    };
    println!("{}", out);

    Ok(())
}

async fn emit(args: EmitArgs) -> Result<()> {
    let timestamp = match args.timestamp {
        Some(ts) => ts,
        None => SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs(),
    };
    let pkt = FullPacket::new(
        PrimaryHeader::telemetry(args.apid, args.seq_flags, args.seq_count),
        SecondaryHeader {
            timestamp,
            subsystem_id: args.subsystem_id,
        },
        TelemetryPayload::new(args.temperature, args.battery, args.altitude, args.signal),
    );

    let n = ingest_svc::send_packet(args.target, &pkt)
        .await
        .with_context(|| format!("failed to send packet to {}", args.target))?;
    info!("sent {} bytes (apid {}) to {}", n, pkt.apid(), args.target);

    Ok(())
}
