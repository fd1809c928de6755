use chrono::{DateTime, Duration, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result, Row, ToSql};
use serde::Serialize;

use crate::anomaly_svc::{
    ALTITUDE_THRESHOLD_KM, BATTERY_THRESHOLD_PERCENT, SIGNAL_THRESHOLD_DB, TEMPERATURE_THRESHOLD_C,
};
use crate::error::PersistError;
use crate::packet::FullPacket;

const COLUMNS: &str = "apid, seq_flags, seq_count, timestamp, subsystem_id,
    temperature, battery, altitude, signal, raw_packet";

/// One persisted packet.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct TelemetryRow {
    pub apid: u16,
    pub seq_flags: u8,
    pub seq_count: u16,
    pub timestamp: DateTime<Utc>,
    pub subsystem_id: u16,
    pub temperature: f32,
    pub battery: f32,
    pub altitude: f32,
    pub signal: f32,
    #[serde(skip)]
    pub raw_packet: Vec<u8>,
}

impl TelemetryRow {
    pub fn from_packet(pkt: &FullPacket) -> Result<Self, PersistError> {
        let secs = pkt.secondary.timestamp;
        let timestamp = i64::try_from(secs)
            .ok()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .ok_or_else(|| {
                PersistError::ConstraintViolation(format!("timestamp {} is out of range", secs))
            })?;

        Ok(Self {
            apid: pkt.primary.apid(),
            seq_flags: pkt.primary.seq_flags(),
            seq_count: pkt.primary.seq_count(),
            timestamp,
            subsystem_id: pkt.secondary.subsystem_id,
            temperature: pkt.payload.temperature,
            battery: pkt.payload.battery,
            altitude: pkt.payload.altitude,
            signal: pkt.payload.signal,
            raw_packet: pkt.raw().to_vec(),
        })
    }

    fn from_sql(row: &Row) -> Result<Self> {
        // NULL measurements were NaN on the wire
        let measurement = |i: usize| -> Result<f32> { Ok(row.get::<_, Option<f32>>(i)?.unwrap_or(f32::NAN)) };
        Ok(Self {
            apid: row.get(0)?,
            seq_flags: row.get(1)?,
            seq_count: row.get(2)?,
            timestamp: row.get(3)?,
            subsystem_id: row.get(4)?,
            temperature: measurement(5)?,
            battery: measurement(6)?,
            altitude: measurement(7)?,
            signal: measurement(8)?,
            raw_packet: row.get(9)?,
        })
    }
}

/// Inclusive time range for reads, defaulting to the last hour.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        let now = Utc::now();
        Self {
            start: start.unwrap_or(now - Duration::hours(1)),
            end: end.unwrap_or(now),
        }
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct MeasurementStats {
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub average: Option<f64>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SubsystemAggregate {
    pub subsystem_id: u16,
    pub altitude: MeasurementStats,
    pub battery: MeasurementStats,
    pub signal: MeasurementStats,
    pub temperature: MeasurementStats,
}

pub fn insert(conn: &Connection, row: &TelemetryRow) -> Result<usize> {
    conn.execute(
        &format!("INSERT INTO ccsds_packets ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
        params![
            row.apid,
            row.seq_flags,
            row.seq_count,
            row.timestamp,
            row.subsystem_id,
            row.temperature,
            row.battery,
            row.altitude,
            row.signal,
            row.raw_packet,
        ],
    )
}

pub fn count(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM ccsds_packets", [], |row| row.get(0))
}

/// Most recent packet by timestamp.
pub fn current(conn: &Connection) -> Result<Option<TelemetryRow>> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM ccsds_packets ORDER BY timestamp DESC, id DESC LIMIT 1"),
        [],
        TelemetryRow::from_sql,
    )
    .optional()
}

pub fn list(conn: &Connection, window: &TimeWindow, limit: u32) -> Result<Vec<TelemetryRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM ccsds_packets
            WHERE timestamp BETWEEN ?1 AND ?2
            ORDER BY timestamp DESC, id DESC
            LIMIT ?3"
    ))?;
    let rows = stmt.query_map(params![window.start, window.end, limit], TelemetryRow::from_sql)?;
    rows.collect()
}

pub const LIST_LIMIT: u32 = 100;
pub const ANOMALY_LIMIT: u32 = 50;

const ANOMALY_FILTER: &str = "WHERE timestamp BETWEEN ?1 AND ?2
    AND (altitude < ?3 OR battery < ?4 OR signal < ?5 OR temperature > ?6)";

/// Newest anomalous packets plus how many the window holds in total.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyReport {
    pub total_records: i64,
    pub data: Vec<TelemetryRow>,
}

/// Packets in the window with at least one measurement past its alert threshold.
pub fn anomalies(conn: &Connection, window: &TimeWindow, limit: u32) -> Result<AnomalyReport> {
    let filter: &[&dyn ToSql] = &[
        &window.start,
        &window.end,
        &ALTITUDE_THRESHOLD_KM,
        &BATTERY_THRESHOLD_PERCENT,
        &SIGNAL_THRESHOLD_DB,
        &TEMPERATURE_THRESHOLD_C,
    ];

    let total_records = conn.query_row(
        &format!("SELECT COUNT(*) FROM ccsds_packets {ANOMALY_FILTER}"),
        filter,
        |row| row.get(0),
    )?;

    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM ccsds_packets {ANOMALY_FILTER}
            ORDER BY timestamp DESC, id DESC
            LIMIT {limit}"
    ))?;
    let data = stmt
        .query_map(filter, TelemetryRow::from_sql)?
        .collect::<Result<_>>()?;

    Ok(AnomalyReport { total_records, data })
}

/// Min, max and mean of each measurement per subsystem.
pub fn aggregate(conn: &Connection, window: &TimeWindow) -> Result<Vec<SubsystemAggregate>> {
    let mut stmt = conn.prepare(
        "SELECT subsystem_id,
            MIN(altitude), MAX(altitude), AVG(altitude),
            MIN(battery), MAX(battery), AVG(battery),
            MIN(signal), MAX(signal), AVG(signal),
            MIN(temperature), MAX(temperature), AVG(temperature)
            FROM ccsds_packets
            WHERE timestamp BETWEEN ?1 AND ?2
            GROUP BY subsystem_id
            ORDER BY subsystem_id",
    )?;
    let rows = stmt.query_map(params![window.start, window.end], |row| {
        let stats = |i: usize| -> Result<MeasurementStats> {
            Ok(MeasurementStats {
                minimum: row.get(i)?,
                maximum: row.get(i + 1)?,
                average: row.get(i + 2)?,
            })
        };
        Ok(SubsystemAggregate {
            subsystem_id: row.get(0)?,
            altitude: stats(1)?,
            battery: stats(4)?,
            signal: stats(7)?,
            temperature: stats(10)?,
        })
    })?;
    rows.collect()
}
