#[macro_use]
mod macros;

pub mod anomaly_svc;
pub mod config;
pub mod database_svc;
pub mod error;
pub mod health_svc;
pub mod ingest_svc;
pub mod notify_svc;
pub mod packet;
pub mod packet_payload;
