use rusqlite::{params, Connection, Result};
use tracing::info;

pub fn cleanup(conn: &Connection) -> Result<()> {
    conn.execute("DROP INDEX IF EXISTS ccsds_packets_timestamp", [])?;
    conn.execute("DROP TABLE IF EXISTS ccsds_packets", [])?;
    conn.execute("DROP TABLE IF EXISTS db_info", [])?;

    Ok(())
}

pub fn create(conn: &Connection) -> Result<()> {
    // create db_info table
    conn.execute(
        "CREATE TABLE IF NOT EXISTS db_info (
                id      INTEGER PRIMARY KEY,
                version INTEGER NOT NULL
                )",
        [],
    )?;

    // initialize schema version
    conn.execute(
        "INSERT OR REPLACE INTO db_info (id, version) VALUES (?1, ?2)",
        params![0, super::SCHEMA_VERSION],
    )?;
    info!("database_svc: db_info table initialized");

    // create telemetry table, measurements are nullable since sqlite stores NaN as NULL
    conn.execute(
        "CREATE TABLE IF NOT EXISTS ccsds_packets (
                id           INTEGER PRIMARY KEY,
                apid         INTEGER NOT NULL,
                seq_flags    INTEGER NOT NULL,
                seq_count    INTEGER NOT NULL,
                timestamp    TEXT NOT NULL,
                subsystem_id INTEGER NOT NULL,
                temperature  REAL,
                battery      REAL,
                altitude     REAL,
                signal       REAL,
                raw_packet   BLOB NOT NULL
                )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS ccsds_packets_timestamp ON ccsds_packets (timestamp)",
        [],
    )?;
    info!("database_svc: ccsds_packets table created");

    Ok(())
}
