// sqlexport/src/export/db.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures::{Stream, TryStreamExt};
use sqlx::postgres::PgRow;
use sqlx::{Column, Connection, Executor, PgConnection, Row, Statement, TypeInfo};
use std::future::Future;
use std::time::Duration;
use tiberius::{ColumnData, FromSql, QueryItem};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info, warn};
use url::Url;

use super::csv_writer::CsvExport;
use crate::config::{ClientConfig, DbDriver};
use crate::errors::ExportError;

type TdsClient = tiberius::Client<Compat<TcpStream>>;

const REDACTED: &str = "****";

/// Anything able to run a query and stream its result set into a CSV sink.
#[async_trait]
pub trait QuerySource {
    async fn export_query(&mut self, query: &str, out: &mut CsvExport) -> Result<()>;
}

enum DbConnection {
    SqlServer(TdsClient),
    Postgres(PgConnection),
}

/// An open database handle plus the per-operation time limit from `db_timeout`.
pub struct Database {
    conn: DbConnection,
    timeout: Option<Duration>,
}

impl Database {
    /// Opens the configured connection. Any failure here is fatal to the run.
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        let timeout = config.query_timeout()?;
        info!(
            "🔌 Connecting to {:?} database: {}",
            config.db_driver,
            connection_string_with(config, REDACTED)?
        );
        let conn_str = connection_string(config)?;

        let conn = match config.db_driver {
            DbDriver::SqlServer => {
                let client = with_timeout(timeout, "connect to SQL Server", connect_sqlserver(&conn_str))
                    .await?;
                DbConnection::SqlServer(client)
            }
            DbDriver::Postgres => {
                let pg = with_timeout(timeout, "connect to PostgreSQL", connect_postgres(&conn_str))
                    .await?;
                DbConnection::Postgres(pg)
            }
        };

        info!("✅ Connected to database {}", config.db_name);
        Ok(Self { conn, timeout })
    }

    pub async fn close(self) -> Result<()> {
        match self.conn {
            DbConnection::SqlServer(client) => client
                .close()
                .await
                .context("Failed to close SQL Server connection")?,
            DbConnection::Postgres(conn) => conn
                .close()
                .await
                .context("Failed to close PostgreSQL connection")?,
        }
        debug!("Database connection closed");
        Ok(())
    }
}

#[async_trait]
impl QuerySource for Database {
    async fn export_query(&mut self, query: &str, out: &mut CsvExport) -> Result<()> {
        let timeout = self.timeout;
        match &mut self.conn {
            DbConnection::SqlServer(client) => {
                with_timeout(timeout, "query", export_sqlserver(client, query, out)).await
            }
            DbConnection::Postgres(conn) => {
                with_timeout(timeout, "query", export_postgres(conn, query, out)).await
            }
        }
    }
}

/// Builds the driver connection string for the configured database.
pub fn connection_string(config: &ClientConfig) -> Result<String> {
    connection_string_with(config, &config.db_pass)
}

fn connection_string_with(config: &ClientConfig, password: &str) -> Result<String> {
    let (host, port) = config.db_endpoint()?;
    match config.db_driver {
        DbDriver::SqlServer => Ok(format!(
            "server=tcp:{},{};database={};user id={};password={};TrustServerCertificate={}",
            host,
            port,
            ado_value(&config.db_name),
            ado_value(&config.db_user),
            ado_value(password),
            config.db_trust_server_certificate
        )),
        DbDriver::Postgres => {
            let mut url = Url::parse(&format!("postgres://{}:{}", host, port))
                .with_context(|| format!("Invalid database host: {}", host))?;
            url.set_username(&config.db_user)
                .map_err(|_| anyhow::anyhow!("Cannot set user name on database URL"))?;
            url.set_password(Some(password))
                .map_err(|_| anyhow::anyhow!("Cannot set password on database URL"))?;
            url.set_path(&config.db_name);
            Ok(url.to_string())
        }
    }
}

/// Quotes an ADO.NET connection string value when it would otherwise break
/// the `key=value;` syntax.
fn ado_value(value: &str) -> String {
    let needs_quoting = value.contains([';', '"', '\''])
        || value.starts_with(char::is_whitespace)
        || value.ends_with(char::is_whitespace);
    if needs_quoting {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

async fn with_timeout<T, F>(limit: Option<Duration>, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| ExportError::Timeout {
            operation: operation.to_string(),
            secs: limit.as_secs(),
        })?,
        None => fut.await,
    }
}

async fn connect_sqlserver(conn_str: &str) -> Result<TdsClient> {
    let tds_config = tiberius::Config::from_ado_string(conn_str)
        .map_err(|e| ExportError::Connection(e.to_string()))?;
    let tcp = TcpStream::connect(tds_config.get_addr())
        .await
        .map_err(|e| ExportError::Connection(format!("{}: {}", tds_config.get_addr(), e)))?;
    tcp.set_nodelay(true)?;
    let client = tiberius::Client::connect(tds_config, tcp.compat_write())
        .await
        .map_err(|e| ExportError::Connection(e.to_string()))?;
    Ok(client)
}

async fn connect_postgres(conn_str: &str) -> Result<PgConnection> {
    let conn = PgConnection::connect(conn_str)
        .await
        .map_err(|e| ExportError::Connection(e.to_string()))?;
    Ok(conn)
}

/// A SQL Server response item: the column names opening a result set, or one
/// row of the most recent result set.
enum TdsItem {
    Columns(Vec<String>),
    Row(Vec<ColumnData<'static>>),
}

async fn export_sqlserver(client: &mut TdsClient, query: &str, out: &mut CsvExport) -> Result<()> {
    let items = client
        .simple_query(query)
        .await?
        .map_ok(|item| match item {
            QueryItem::Metadata(meta) => {
                TdsItem::Columns(meta.columns().iter().map(|c| c.name().to_string()).collect())
            }
            QueryItem::Row(row) => TdsItem::Row(row.into_iter().collect()),
        })
        .map_err(anyhow::Error::from);
    write_first_result_set(items, out).await
}

/// Writes the first result set of a batch. Later result sets are drained so
/// the connection stays usable, but they never reach the CSV file.
async fn write_first_result_set<S>(mut items: S, out: &mut CsvExport) -> Result<()>
where
    S: Stream<Item = Result<TdsItem>> + Unpin,
{
    let mut result_sets = 0usize;
    let mut skipped_rows = 0u64;
    while let Some(item) = items.try_next().await? {
        match item {
            TdsItem::Columns(names) => {
                result_sets += 1;
                if result_sets == 1 && !names.is_empty() {
                    out.write_header(&names)?;
                }
            }
            TdsItem::Row(cells) if result_sets <= 1 => {
                let fields = cells
                    .into_iter()
                    .map(tds_cell_to_string)
                    .collect::<Result<Vec<_>>>()?;
                out.write_row(&fields)?;
            }
            TdsItem::Row(_) => skipped_rows += 1,
        }
    }
    if result_sets > 1 {
        warn!(
            "Query returned {} result sets; only the first was exported ({} rows ignored)",
            result_sets, skipped_rows
        );
    }
    Ok(())
}

/// Renders a SQL Server value as a CSV field. NULL becomes an empty field and
/// binary data is hex encoded.
fn tds_cell_to_string(data: ColumnData<'static>) -> Result<String> {
    let text = match &data {
        ColumnData::U8(v) => v.as_ref().map(|v| v.to_string()),
        ColumnData::I16(v) => v.as_ref().map(|v| v.to_string()),
        ColumnData::I32(v) => v.as_ref().map(|v| v.to_string()),
        ColumnData::I64(v) => v.as_ref().map(|v| v.to_string()),
        ColumnData::F32(v) => v.as_ref().map(|v| v.to_string()),
        ColumnData::F64(v) => v.as_ref().map(|v| v.to_string()),
        ColumnData::Bit(v) => v.as_ref().map(|v| v.to_string()),
        ColumnData::String(v) => v.as_ref().map(|v| v.to_string()),
        ColumnData::Guid(v) => v.as_ref().map(|v| v.to_string()),
        ColumnData::Numeric(v) => v.as_ref().map(|v| v.to_string()),
        ColumnData::Binary(v) => v.as_ref().map(hex::encode),
        ColumnData::Xml(v) => v.as_ref().map(|x| x.clone().into_owned().into_string()),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            NaiveDateTime::from_sql(&data)?.map(|v| v.to_string())
        }
        ColumnData::Date(_) => NaiveDate::from_sql(&data)?.map(|v| v.to_string()),
        ColumnData::Time(_) => NaiveTime::from_sql(&data)?.map(|v| v.to_string()),
        ColumnData::DateTimeOffset(_) => {
            DateTime::<FixedOffset>::from_sql(&data)?.map(|v| v.to_rfc3339())
        }
    };
    Ok(text.unwrap_or_default())
}

async fn export_postgres(conn: &mut PgConnection, query: &str, out: &mut CsvExport) -> Result<()> {
    let statement = (&mut *conn).prepare(query).await?;
    let columns: Vec<String> = statement
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();
    if !columns.is_empty() {
        out.write_header(&columns)?;
    }

    let mut rows = sqlx::query(query).fetch(&mut *conn);
    while let Some(row) = rows.try_next().await? {
        let fields = (0..row.len())
            .map(|idx| pg_cell_to_string(&row, idx))
            .collect::<Result<Vec<_>>>()?;
        out.write_row(&fields)?;
    }
    Ok(())
}

/// Renders a PostgreSQL value as a CSV field by trying the supported Rust
/// types in turn. NULL becomes an empty field.
fn pg_cell_to_string(row: &PgRow, idx: usize) -> Result<String> {
    if let Ok(val) = row.try_get::<Option<String>, _>(idx) {
        return Ok(val.unwrap_or_default());
    }

    if let Ok(val) = row.try_get::<Option<i16>, _>(idx) {
        return Ok(val.map(|v| v.to_string()).unwrap_or_default());
    }
    if let Ok(val) = row.try_get::<Option<i32>, _>(idx) {
        return Ok(val.map(|v| v.to_string()).unwrap_or_default());
    }
    if let Ok(val) = row.try_get::<Option<i64>, _>(idx) {
        return Ok(val.map(|v| v.to_string()).unwrap_or_default());
    }

    if let Ok(val) = row.try_get::<Option<f32>, _>(idx) {
        return Ok(val.map(|v| v.to_string()).unwrap_or_default());
    }
    if let Ok(val) = row.try_get::<Option<f64>, _>(idx) {
        return Ok(val.map(|v| v.to_string()).unwrap_or_default());
    }
    if let Ok(val) = row.try_get::<Option<sqlx::types::BigDecimal>, _>(idx) {
        return Ok(val.map(|v| v.to_string()).unwrap_or_default());
    }

    if let Ok(val) = row.try_get::<Option<bool>, _>(idx) {
        return Ok(val.map(|v| v.to_string()).unwrap_or_default());
    }
    if let Ok(val) = row.try_get::<Option<uuid::Uuid>, _>(idx) {
        return Ok(val.map(|v| v.to_string()).unwrap_or_default());
    }
    if let Ok(val) = row.try_get::<Option<serde_json::Value>, _>(idx) {
        return Ok(val.map(|v| v.to_string()).unwrap_or_default());
    }

    if let Ok(val) = row.try_get::<Option<DateTime<Utc>>, _>(idx) {
        return Ok(val.map(|v| v.to_rfc3339()).unwrap_or_default());
    }
    if let Ok(val) = row.try_get::<Option<NaiveDateTime>, _>(idx) {
        return Ok(val.map(|v| v.to_string()).unwrap_or_default());
    }
    if let Ok(val) = row.try_get::<Option<NaiveDate>, _>(idx) {
        return Ok(val.map(|v| v.to_string()).unwrap_or_default());
    }
    if let Ok(val) = row.try_get::<Option<NaiveTime>, _>(idx) {
        return Ok(val.map(|v| v.to_string()).unwrap_or_default());
    }

    if let Ok(val) = row.try_get::<Option<Vec<u8>>, _>(idx) {
        return Ok(val.map(hex::encode).unwrap_or_default());
    }
    if let Ok(val) = row.try_get::<Option<Vec<String>>, _>(idx) {
        return Ok(val.map(|v| format!("{{{}}}", v.join(","))).unwrap_or_default());
    }

    let column = &row.columns()[idx];
    Err(anyhow::anyhow!(
        "Unsupported data type {} for column {}",
        column.type_info().name(),
        column.name()
    ))
}
