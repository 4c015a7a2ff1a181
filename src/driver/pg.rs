//! PostgreSQL driver.
//!
//! Accepts libpq key/value descriptors (`host=db1 user=monitor`) and
//! `postgres://` URLs. TLS is used unless the descriptor says
//! `sslmode=disable`. Like libpq's `prefer` and `require`, TLS encrypts the
//! session without verifying the server certificate or hostname.

use std::fmt::{Display, Write as _};
use std::time::Duration;

use native_tls::TlsConnector;
use postgres::config::SslMode;
use postgres::types::{FromSql, Type};
use postgres::fallible_iterator::FallibleIterator;
use postgres::{Client, Config, NoTls, Row};
use postgres_native_tls::MakeTlsConnector;
use tracing::debug;

use super::{Connection, Driver, DriverError, RowCursor};
use crate::event::RawValue;
use crate::target::Target;

/// Default time allowed for establishing a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Driver backed by the synchronous `postgres` client.
#[derive(Debug, Clone)]
pub struct PostgresDriver {
    connect_timeout: Duration,
}

impl Default for PostgresDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl PostgresDriver {
    pub fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Sets the connect timeout. `Duration::ZERO` leaves it unbounded.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Driver for PostgresDriver {
    fn open(&self, target: &Target) -> Result<Box<dyn Connection>, DriverError> {
        let mut config: Config = target
            .descriptor()
            .parse()
            .map_err(|e| DriverError::Connect(format!("invalid descriptor: {e}")))?;
        if !self.connect_timeout.is_zero() {
            config.connect_timeout(self.connect_timeout);
        }

        let client = match tls_policy(config.get_ssl_mode()) {
            TlsPolicy::Plain => config.connect(NoTls),
            TlsPolicy::Unverified => {
                let connector = TlsConnector::builder()
                    .danger_accept_invalid_certs(true)
                    .danger_accept_invalid_hostnames(true)
                    .build()
                    .map_err(|e| DriverError::Connect(format!("tls setup: {e}")))?;
                config.connect(MakeTlsConnector::new(connector))
            }
        }
        .map_err(|e| DriverError::Connect(format_postgres_error(&e)))?;

        debug!(target_name = %target, "PostgreSQL connection established");
        Ok(Box::new(PgConnection { client }))
    }
}

/// How a connection is secured for a given `sslmode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TlsPolicy {
    Plain,
    /// Encrypted, server certificate and hostname not checked.
    Unverified,
}

fn tls_policy(mode: SslMode) -> TlsPolicy {
    match mode {
        SslMode::Disable => TlsPolicy::Plain,
        _ => TlsPolicy::Unverified,
    }
}

struct PgConnection {
    client: Client,
}

impl Connection for PgConnection {
    fn query<'a>(&'a mut self, sql: &str) -> Result<Box<dyn RowCursor + 'a>, DriverError> {
        // Prepare first so column names are known even for empty results.
        let statement = self
            .client
            .prepare(sql)
            .map_err(|e| DriverError::Query(format_postgres_error(&e)))?;
        let columns = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        let rows = self
            .client
            .query_raw(&statement, std::iter::empty::<&str>())
            .map_err(|e| DriverError::Query(format_postgres_error(&e)))?;

        Ok(Box::new(PgCursor { columns, rows }))
    }

    fn close(self: Box<Self>) -> Result<(), DriverError> {
        self.client
            .close()
            .map_err(|e| DriverError::Close(format_postgres_error(&e)))
    }
}

/// Streams rows from the server as they are fetched.
struct PgCursor<I> {
    columns: Vec<String>,
    rows: I,
}

impl<I> RowCursor for PgCursor<I>
where
    I: FallibleIterator<Item = Row>,
    I::Error: Display,
{
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next_row(&mut self) -> Result<Option<Vec<RawValue>>, DriverError> {
        let row = self
            .rows
            .next()
            .map_err(|e| DriverError::Fetch(e.to_string()))?;
        Ok(row.map(|row| (0..row.len()).map(|idx| column_value(&row, idx)).collect()))
    }
}

/// Maps one column of a row to its raw representation.
fn column_value(row: &Row, idx: usize) -> RawValue {
    let ty = row.columns()[idx].type_();

    let fetched = if *ty == Type::INT2 {
        fetch(row, idx, |v: i16| RawValue::Int(v.into()))
    } else if *ty == Type::INT4 {
        fetch(row, idx, |v: i32| RawValue::Int(v.into()))
    } else if *ty == Type::INT8 {
        fetch(row, idx, RawValue::Int)
    } else if *ty == Type::OID {
        fetch(row, idx, |v: u32| RawValue::Int(v.into()))
    } else if *ty == Type::FLOAT4 {
        fetch(row, idx, |v: f32| RawValue::Float(v.into()))
    } else if *ty == Type::FLOAT8 {
        fetch(row, idx, RawValue::Float)
    } else if *ty == Type::NUMERIC {
        fetch(row, idx, |v: NumericText| RawValue::Text(v.0))
    } else if *ty == Type::BOOL {
        fetch(row, idx, |v: bool| RawValue::Text(v.to_string()))
    } else if *ty == Type::BYTEA {
        fetch(row, idx, RawValue::Bytes)
    } else if *ty == Type::TIMESTAMPTZ {
        fetch(row, idx, RawValue::Timestamp)
    } else if *ty == Type::TIMESTAMP {
        fetch(row, idx, |v: chrono::NaiveDateTime| RawValue::Timestamp(v.and_utc()))
    } else if <String as FromSql<'_>>::accepts(ty) {
        fetch(row, idx, RawValue::Text)
    } else {
        return RawValue::Unsupported(ty.name().to_string());
    };

    fetched.unwrap_or_else(|e| RawValue::Unsupported(format!("{} ({})", ty.name(), e)))
}

fn fetch<'a, T: FromSql<'a>>(
    row: &'a Row,
    idx: usize,
    map: impl FnOnce(T) -> RawValue,
) -> Result<RawValue, postgres::Error> {
    Ok(row
        .try_get::<_, Option<T>>(idx)?
        .map(map)
        .unwrap_or(RawValue::Null))
}

/// `numeric` rendered as decimal text, the way text-protocol drivers return it.
struct NumericText(String);

impl<'a> FromSql<'a> for NumericText {
    fn from_sql(
        _ty: &Type,
        raw: &'a [u8],
    ) -> Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        render_numeric(raw).map(NumericText).map_err(Into::into)
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// Renders the binary `numeric` wire format as decimal text.
///
/// Layout: ndigits, weight, sign, dscale (all 16-bit big-endian), followed by
/// `ndigits` base-10000 digits. `weight` is the power of 10000 of the first
/// digit.
fn render_numeric(raw: &[u8]) -> Result<String, String> {
    let read = |offset: usize| -> Result<u16, String> {
        raw.get(offset..offset + 2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
            .ok_or_else(|| "truncated numeric value".to_string())
    };

    let ndigits = read(0)? as usize;
    let weight = i32::from(read(2)? as i16);
    let sign = read(4)?;
    let dscale = read(6)? as usize;
    let digits = (0..ndigits)
        .map(|i| read(8 + 2 * i))
        .collect::<Result<Vec<_>, _>>()?;

    match sign {
        NUMERIC_NAN => return Ok("NaN".to_string()),
        NUMERIC_PINF => return Ok("Infinity".to_string()),
        NUMERIC_NINF => return Ok("-Infinity".to_string()),
        _ => {}
    }

    let digit = |idx: i32| -> u16 {
        usize::try_from(idx)
            .ok()
            .and_then(|i| digits.get(i).copied())
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == NUMERIC_NEG {
        out.push('-');
    }

    if weight < 0 {
        out.push('0');
    } else {
        let _ = write!(out, "{}", digit(0));
        for idx in 1..=weight {
            let _ = write!(out, "{:04}", digit(idx));
        }
    }

    if dscale > 0 {
        let mut frac = String::with_capacity(dscale + 4);
        let mut idx = weight + 1;
        while frac.len() < dscale {
            let _ = write!(frac, "{:04}", digit(idx));
            idx += 1;
        }
        frac.truncate(dscale);
        out.push('.');
        out.push_str(&frac);
    }

    Ok(out)
}

/// Formats a PostgreSQL error for logs.
fn format_postgres_error(e: &postgres::Error) -> String {
    match e.as_db_error() {
        Some(db_error) => format!("{}: {}", db_error.severity(), db_error.message()),
        None => summarize_client_error(&e.to_string()),
    }
}

/// Shortens client-side failures (network, TLS, auth) to their cause.
fn summarize_client_error(msg: &str) -> String {
    let lower = msg.to_ascii_lowercase();
    if lower.contains("connection refused") {
        "connection refused".to_string()
    } else if lower.contains("timed out") || lower.contains("timeout") {
        "connection timed out".to_string()
    } else if lower.contains("password authentication failed") {
        "password authentication failed".to_string()
    } else if lower.contains("server does not support tls") {
        "server does not support TLS (set sslmode=disable)".to_string()
    } else if lower.contains("tls") || lower.contains("ssl") || lower.contains("handshake") {
        format!("TLS handshake failed: {msg}")
    } else if let Some((_, detail)) = msg.rsplit_once("FATAL:") {
        detail.trim().to_string()
    } else {
        msg.to_string()
    }
}
