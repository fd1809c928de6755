use std::{collections::BTreeMap, fmt, sync::Arc};
use tokio::task::JoinHandle;
use tracing::{error, warn};

use super::notify_svc::Notifier;
use super::packet::FullPacket;
use super::packet_payload::TelemetryPayload;

/*  THRESHOLDS
Altitude    - 500-550km nominal, anomaly below 400km
Battery     - 70-100% nominal, anomaly below 40%
Signal      - -60 to -40dB nominal, anomaly below -80dB
Temperature - 20-30C nominal, anomaly above 35C
Values exactly on a threshold are nominal.
*/
pub const ALTITUDE_THRESHOLD_KM: f32 = 400.0;
pub const BATTERY_THRESHOLD_PERCENT: f32 = 40.0;
pub const SIGNAL_THRESHOLD_DB: f32 = -80.0;
pub const TEMPERATURE_THRESHOLD_C: f32 = 35.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AnomalyKind {
    Altitude,
    Battery,
    Signal,
    Temperature,
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AnomalyKind::Altitude => "Altitude",
            AnomalyKind::Battery => "Battery",
            AnomalyKind::Signal => "Signal",
            AnomalyKind::Temperature => "Temperature",
        };
        f.write_str(name)
    }
}

pub type Anomalies = BTreeMap<AnomalyKind, String>;

/// Checks every rule against the payload. Each violated rule maps to a
/// description of the compared values.
pub fn detect(payload: &TelemetryPayload) -> Anomalies {
    let mut anomalies = Anomalies::new();

    if payload.altitude < ALTITUDE_THRESHOLD_KM {
        anomalies.insert(
            AnomalyKind::Altitude,
            format!("{:.2}km < {:.2}km", payload.altitude, ALTITUDE_THRESHOLD_KM),
        );
    }
    if payload.battery < BATTERY_THRESHOLD_PERCENT {
        anomalies.insert(
            AnomalyKind::Battery,
            format!("{:.2}% < {:.2}%", payload.battery, BATTERY_THRESHOLD_PERCENT),
        );
    }
    if payload.signal < SIGNAL_THRESHOLD_DB {
        anomalies.insert(
            AnomalyKind::Signal,
            format!("{:.2}dB < {:.2}dB", payload.signal, SIGNAL_THRESHOLD_DB),
        );
    }
    if payload.temperature > TEMPERATURE_THRESHOLD_C {
        anomalies.insert(
            AnomalyKind::Temperature,
            format!("{:.2}°C > {:.2}°C", payload.temperature, TEMPERATURE_THRESHOLD_C),
        );
    }

    anomalies
}

/// One line per violated rule under a header naming the APID.
pub fn compose_alert(apid: u16, anomalies: &Anomalies) -> Option<String> {
    if anomalies.is_empty() {
        return None;
    }

    let mut message = format!("Anomalies detected APID[{}]", apid);
    for (kind, description) in anomalies {
        message.push_str(&format!("\n- {}[{}]", kind, description));
    }
    Some(message)
}

/// Runs anomaly checks off the ingestion path.
pub struct AnomalySvc<N> {
    pub notifier: Arc<N>,
}

impl<N> Clone for AnomalySvc<N> {
    fn clone(&self) -> Self {
        Self {
            notifier: self.notifier.clone(),
        }
    }
}

impl<N: Notifier> AnomalySvc<N> {
    pub fn new(notifier: N) -> Self {
        Self {
            notifier: Arc::new(notifier),
        }
    }

    /// Spawns the check-and-notify task for one packet. The handle may be
    /// dropped; failures inside the task are logged and go no further.
    pub fn submit(&self, pkt: FullPacket) -> JoinHandle<()> {
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            check_and_notify(notifier.as_ref(), &pkt).await;
        })
    }
}

pub async fn check_and_notify<N: Notifier>(notifier: &N, pkt: &FullPacket) -> Anomalies {
    let anomalies = detect(&pkt.payload);

    if let Some(message) = compose_alert(pkt.apid(), &anomalies) {
        warn!("anomaly_svc: {}", message);
        if let Err(e) = notifier.notify(message).await {
            error!("anomaly_svc: failed to deliver anomaly alert: {}", e);
        }
    }

    anomalies
}
