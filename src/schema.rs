//! Engine setup and table registration for `fleet-sensor-anomalies`.
//!
//! Each source table arrives as a pair of files: a pipe-separated header
//! definition listing the column names, and a comma-separated data export
//! whose own header row is discarded. Registration (re)creates the table with
//! the affinity given by a type map and loads every record in one transaction.
//! Called once per table from `main.rs` (EMBP: single gateway call).
//!
//! Timestamps keep the wall-clock time of the export. A trailing UTC offset
//! is accepted and dropped, so a reading's calendar day is the day the
//! vehicle reported it.

use std::{
    collections::BTreeMap,
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

// ---

pub const DEVICE_TABLE: &str = "time_in_level_device";
pub const SENSOR_TABLE: &str = "time_in_level_sensor";

/// Columns parsed as timestamps in both source tables.
pub const TIMESTAMP_COLUMNS: &[&str] = &["report_start_at", "updated_at"];

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Storage type of a source column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ColumnType {
    Integer,
    Real,
    Timestamp,
    Text,
}

impl ColumnType {
    fn sql_type(self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
            Self::Timestamp | Self::Text => "TEXT",
        }
    }
}

/// Column name -> storage type. Unmapped columns load as text.
pub type TypeMap = BTreeMap<String, ColumnType>;

/// Everything needed to register one table.
#[derive(Debug, Clone)]
pub struct TableSource {
    // ---
    pub name: String,
    pub header_path: PathBuf,
    pub data_path: PathBuf,
    pub types: TypeMap,
    pub timestamp_columns: Vec<String>,
}

impl TableSource {
    /// Source for `<dir>/<name>_desc.csv` + `<dir>/<name>.csv`.
    pub fn from_data_dir(dir: &Path, name: &str, types: TypeMap) -> Self {
        // ---
        Self {
            name: name.to_string(),
            header_path: dir.join(format!("{name}_desc.csv")),
            data_path: dir.join(format!("{name}.csv")),
            types,
            timestamp_columns: TIMESTAMP_COLUMNS.iter().map(|c| c.to_string()).collect(),
        }
    }

    fn column_type(&self, column: &str) -> ColumnType {
        // ---
        if self.timestamp_columns.iter().any(|c| c == column) {
            return ColumnType::Timestamp;
        }
        self.types.get(column).copied().unwrap_or(ColumnType::Text)
    }
}

/// Type map for `time_in_level_device`.
pub fn device_type_map() -> TypeMap {
    // ---
    [
        "id",
        "vehicle_id",
        "device_id",
        "vehicle_out_of_service",
        "vehicle_maintenance",
        "transmitting_dur",
        "not_transmitting_dur",
        "transmission_level",
    ]
    .into_iter()
    .map(|c| (c.to_string(), ColumnType::Integer))
    .collect()
}

/// Type map for `time_in_level_sensor`.
pub fn sensor_type_map() -> TypeMap {
    // ---
    let mut map = TypeMap::new();

    let integers = [
        // identifiers and keys
        "id",
        "sensor_id",
        "wheel_position",
        "wheel_id",
        "vehicle_id",
        // flags and categorical ids
        "vehicle_out_of_service",
        "vehicle_maintenance",
        "sensor_priority",
        "sensor_type_id",
        "priority_order",
        // transmission monitoring
        "transmitting_dur",
        "not_transmitting_dur",
        "transmission_level",
    ];
    for column in integers {
        map.insert(column.to_string(), ColumnType::Integer);
    }

    for measure in ["temperature", "cold_pressure", "hot_pressure"] {
        for level in 1..=3 {
            for side in ["high", "low"] {
                for suffix in ["dur", "cnt"] {
                    map.insert(
                        format!("level_{level}_{side}_{measure}_{suffix}"),
                        ColumnType::Integer,
                    );
                }
            }
        }
        map.insert(format!("optimal_{measure}_dur"), ColumnType::Integer);

        for stat in ["min", "max", "sd", "avg"] {
            map.insert(format!("{measure}_{stat}"), ColumnType::Real);
        }
    }

    map
}

// ---

/// Open the analytical engine.
///
/// An in-memory SQLite database lives inside a single connection, so the pool
/// holds exactly one connection that is never recycled.
pub async fn connect(db_url: &str) -> Result<SqlitePool> {
    // ---
    let options = SqliteConnectOptions::from_str(db_url)
        .map_err(|e| anyhow!("Invalid DATABASE_URL '{}': {}", db_url, e))?
        .create_if_missing(true);

    SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .map_err(|e| anyhow!("Failed to open engine '{}': {}", db_url, e))
}

/// Register a table from its header/data file pair (replaces any existing
/// table of the same name). Returns the number of rows loaded.
pub async fn register_table(pool: &SqlitePool, source: &TableSource) -> Result<u64> {
    // ---
    debug!(
        "Type map for '{}':\n{}",
        source.name,
        serde_json::to_string_pretty(&source.types)?
    );

    let columns = read_column_names(&source.header_path)?;
    let types: Vec<ColumnType> = columns.iter().map(|c| source.column_type(c)).collect();
    let records = read_records(&source.data_path, &columns, &types)?;

    let table = quote_ident(&source.name);
    let column_defs = columns
        .iter()
        .zip(&types)
        .map(|(c, t)| format!("{} {}", quote_ident(c), t.sql_type()))
        .collect::<Vec<_>>()
        .join(", ");
    let column_list = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = vec!["?"; columns.len()].join(", ");
    let insert = format!("INSERT INTO {table} ({column_list}) VALUES ({placeholders})");

    let mut tx = pool.begin().await?;

    sqlx::query(&format!("DROP TABLE IF EXISTS {table}"))
        .execute(&mut *tx)
        .await?;

    sqlx::query(&format!("CREATE TABLE {table} ({column_defs})"))
        .execute(&mut *tx)
        .await?;

    for record in records.iter() {
        let mut query = sqlx::query(&insert);
        for value in record {
            query = query.bind(value.as_deref());
        }
        query
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to load a row into '{}'", source.name))?;
    }

    tx.commit().await?;

    info!(
        "Registered table '{}' ({} columns, {} rows)",
        source.name,
        columns.len(),
        records.len()
    );
    Ok(records.len() as u64)
}

// ---

fn read_column_names(path: &Path) -> Result<Vec<String>> {
    // ---
    let file = File::open(path)
        .with_context(|| format!("Failed to open header file {}", path.display()))?;
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'|')
        .from_reader(BufReader::new(file));

    let idx = reader
        .headers()
        .with_context(|| format!("Failed to read header file {}", path.display()))?
        .iter()
        .position(|h| h.trim() == "column_name")
        .ok_or_else(|| anyhow!("{} has no 'column_name' column", path.display()))?;

    let mut columns = Vec::new();
    for result in reader.records() {
        let record = result.with_context(|| format!("Malformed header file {}", path.display()))?;
        if let Some(name) = record.get(idx) {
            let name = name.trim();
            if !name.is_empty() {
                columns.push(name.to_string());
            }
        }
    }

    if columns.is_empty() {
        bail!("{} defines no columns", path.display());
    }
    Ok(columns)
}

fn read_records(
    path: &Path,
    columns: &[String],
    types: &[ColumnType],
) -> Result<Vec<Vec<Option<String>>>> {
    // ---
    let file = File::open(path)
        .with_context(|| format!("Failed to open data file {}", path.display()))?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(BufReader::new(file));

    let mut rows = Vec::new();
    for (line, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("Malformed data file {}", path.display()))?;
        if record.len() != columns.len() {
            bail!(
                "{} record {} has {} fields, expected {}",
                path.display(),
                line + 1,
                record.len(),
                columns.len()
            );
        }

        let mut row = Vec::with_capacity(columns.len());
        for ((field, column), ty) in record.iter().zip(columns).zip(types) {
            let field = field.trim();
            if field.is_empty() {
                row.push(None);
            } else if *ty == ColumnType::Timestamp {
                let ts = normalize_timestamp(field).with_context(|| {
                    format!("{} record {} column '{}'", path.display(), line + 1, column)
                })?;
                row.push(Some(ts));
            } else {
                row.push(Some(field.to_string()));
            }
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Normalize a timestamp field to `YYYY-MM-DD HH:MM:SS` in its own local
/// wall-clock time.
fn normalize_timestamp(raw: &str) -> Result<String> {
    // ---
    for fmt in ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z"] {
        if let Ok(ts) = DateTime::parse_from_str(raw, fmt) {
            return Ok(ts.naive_local().format(TIMESTAMP_FORMAT).to_string());
        }
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.naive_local().format(TIMESTAMP_FORMAT).to_string());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(ts.format(TIMESTAMP_FORMAT).to_string());
        }
    }
    if let Ok(day) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(day.format("%Y-%m-%d 00:00:00").to_string());
    }
    bail!("unrecognized timestamp '{}'", raw)
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::fs;

    #[test]
    fn test_normalize_timestamp_formats() {
        // ---
        let expected = "2023-03-01 08:30:00";
        assert_eq!(normalize_timestamp("2023-03-01 08:30:00").unwrap(), expected);
        assert_eq!(normalize_timestamp("2023-03-01T08:30:00").unwrap(), expected);
        assert_eq!(normalize_timestamp("2023-03-01 08:30:00.123").unwrap(), expected);
        assert_eq!(normalize_timestamp("2023-03-01T08:30:00Z").unwrap(), expected);
        assert_eq!(normalize_timestamp("2023-03-01 08:30:00+02").unwrap(), expected);
        assert_eq!(
            normalize_timestamp("2023-03-01").unwrap(),
            "2023-03-01 00:00:00"
        );
        assert!(normalize_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_offset_keeps_local_calendar_day() {
        // ---
        assert_eq!(
            normalize_timestamp("2023-01-31 22:00:00-05:00").unwrap(),
            "2023-01-31 22:00:00"
        );
        assert_eq!(
            normalize_timestamp("2023-01-31T23:30:00+09:00").unwrap(),
            "2023-01-31 23:30:00"
        );
    }

    #[test]
    fn test_type_maps() {
        // ---
        let sensor = sensor_type_map();
        assert_eq!(sensor.get("sensor_id"), Some(&ColumnType::Integer));
        assert_eq!(
            sensor.get("level_3_low_cold_pressure_dur"),
            Some(&ColumnType::Integer)
        );
        assert_eq!(sensor.get("hot_pressure_avg"), Some(&ColumnType::Real));
        assert_eq!(sensor.get("report_start_at"), None);

        let source = TableSource::from_data_dir(Path::new("data"), SENSOR_TABLE, sensor);
        assert_eq!(source.column_type("report_start_at"), ColumnType::Timestamp);
        assert_eq!(source.column_type("unknown_column"), ColumnType::Text);
        assert_eq!(
            source.header_path,
            Path::new("data").join("time_in_level_sensor_desc.csv")
        );

        assert_eq!(device_type_map().len(), 8);
    }

    #[tokio::test]
    async fn test_register_table_loads_rows_and_nulls() {
        // ---
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("time_in_level_device_desc.csv"),
            "column_name|data_type\nid|bigint\nvehicle_id|integer\nnot_transmitting_dur|integer\nreport_start_at|timestamp\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("time_in_level_device.csv"),
            "a,b,c,d\n1,84,,2023-03-01 00:00:00\n2,85,86400,2023-03-02T00:00:00\n",
        )
        .unwrap();

        let pool = connect("sqlite::memory:").await.unwrap();
        let source = TableSource::from_data_dir(dir.path(), DEVICE_TABLE, device_type_map());
        let rows = register_table(&pool, &source).await.unwrap();
        assert_eq!(rows, 2);

        let (nulls, total): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*) - COUNT(not_transmitting_dur), SUM(vehicle_id) FROM time_in_level_device",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(nulls, 1);
        assert_eq!(total, 169);

        let latest: String =
            sqlx::query_scalar("SELECT MAX(report_start_at) FROM time_in_level_device")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(latest, "2023-03-02 00:00:00");

        // Registering again replaces the table instead of appending.
        let rows = register_table(&pool, &source).await.unwrap();
        assert_eq!(rows, 2);
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM time_in_level_device")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_register_table_rejects_ragged_rows() {
        // ---
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("t_desc.csv"),
            "column_name\nid\nvehicle_id\n",
        )
        .unwrap();
        fs::write(dir.path().join("t.csv"), "id,vehicle_id\n1,2,3\n").unwrap();

        let pool = connect("sqlite::memory:").await.unwrap();
        let source = TableSource::from_data_dir(dir.path(), "t", TypeMap::new());
        assert!(register_table(&pool, &source).await.is_err());
    }

    #[tokio::test]
    async fn test_register_table_missing_files_is_error() {
        // ---
        let dir = tempfile::tempdir().unwrap();
        let pool = connect("sqlite::memory:").await.unwrap();
        let source = TableSource::from_data_dir(dir.path(), SENSOR_TABLE, sensor_type_map());
        assert!(register_table(&pool, &source).await.is_err());
    }
}
