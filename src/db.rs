use std::time::Duration;

use anyhow::Result;
use oracle::Connection;
use oracle::sql_type::ToSql;
use url::Url;

use crate::config::DatabaseConfig;
use crate::shutdown::Shutdown;

const DEFAULT_LISTENER_PORT: u16 = 1521;

const TIMEOUT_CODES: &[&str] = &["ORA-01013", "ORA-03156", "DPI-1067"];
const CONNECTION_CODES: &[&str] = &[
    "ORA-03113",
    "ORA-03114",
    "ORA-03135",
    "ORA-12170",
    "ORA-12514",
    "ORA-12537",
    "ORA-12541",
    "ORA-28547",
    "DPI-1010",
    "DPI-1080",
];

/// Bind value for a positional placeholder (`:1`, `:2`, ...).
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Int(i64),
    Float(f64),
    Text(String),
}

impl SqlParam {
    fn as_to_sql(&self) -> &dyn ToSql {
        match self {
            SqlParam::Int(v) => v as &dyn ToSql,
            SqlParam::Float(v) => v as &dyn ToSql,
            SqlParam::Text(v) => v as &dyn ToSql,
        }
    }
}

fn bind_values(params: &[SqlParam]) -> Vec<&dyn ToSql> {
    params.iter().map(SqlParam::as_to_sql).collect()
}

/// How much work to do per fetched row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fetch {
    /// Pull the row over the wire and drop it.
    Discard,
    /// Also decode every column, like a client reading the whole row.
    Columns,
}

/// One open database session. Transactions are explicit: nothing is
/// committed unless `commit` is called.
pub trait Session: Send {
    /// Runs DML, DDL or PL/SQL and returns the affected row count.
    fn execute(&mut self, sql: &str, params: &[SqlParam]) -> Result<u64>;

    /// Runs a query and drains its result set, returning the rows fetched.
    /// Stops early once `cancel` is triggered.
    fn query_drain(
        &mut self,
        sql: &str,
        params: &[SqlParam],
        fetch: Fetch,
        cancel: &Shutdown,
    ) -> Result<u64>;

    /// Array DML: one round trip for all rows.
    fn execute_batch(&mut self, sql: &str, rows: &[Vec<SqlParam>]) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    /// Upper bound for each round trip; `None` waits forever.
    fn set_call_timeout(&mut self, timeout: Option<Duration>) -> Result<()>;
}

pub trait Connector: Send + Sync {
    fn connect(&self) -> Result<Box<dyn Session>>;
}

pub struct OracleConnector {
    connect_string: String,
    username: String,
    password: String,
}

impl OracleConnector {
    pub fn new(cfg: &DatabaseConfig) -> Self {
        Self {
            connect_string: cfg.connect_string.clone(),
            username: cfg.username.clone(),
            password: cfg.password.clone(),
        }
    }
}

impl Connector for OracleConnector {
    fn connect(&self) -> Result<Box<dyn Session>> {
        // Sessions start with autocommit off
        let conn = Connection::connect(&self.username, &self.password, &self.connect_string)?;
        Ok(Box::new(OracleSession { conn }))
    }
}

struct OracleSession {
    conn: Connection,
}

impl Session for OracleSession {
    fn execute(&mut self, sql: &str, params: &[SqlParam]) -> Result<u64> {
        let binds = bind_values(params);
        let stmt = self.conn.execute(sql, &binds)?;
        Ok(stmt.row_count()?)
    }

    fn query_drain(
        &mut self,
        sql: &str,
        params: &[SqlParam],
        fetch: Fetch,
        cancel: &Shutdown,
    ) -> Result<u64> {
        let binds = bind_values(params);
        let rows = self.conn.query(sql, &binds)?;
        let mut fetched = 0;
        for row in rows {
            let row = row?;
            if fetch == Fetch::Columns {
                for idx in 0..row.sql_values().len() {
                    let _: Option<String> = row.get(idx)?;
                }
            }
            fetched += 1;
            if cancel.is_triggered() {
                break;
            }
        }
        Ok(fetched)
    }

    fn execute_batch(&mut self, sql: &str, rows: &[Vec<SqlParam>]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut batch = self.conn.batch(sql, rows.len()).build()?;
        for row in rows {
            batch.append_row(&bind_values(row))?;
        }
        batch.execute()?;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        Ok(self.conn.commit()?)
    }

    fn rollback(&mut self) -> Result<()> {
        Ok(self.conn.rollback()?)
    }

    fn set_call_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        Ok(self.conn.set_call_timeout(timeout)?)
    }
}

/// Categorize error type for metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Timeout,
    Connection,
    Other,
}

/// Structured Oracle error info (if available) from an anyhow::Error
#[derive(Debug, Clone)]
pub struct OraErrorInfo {
    pub code: String,
    pub message: String,
    pub offset: u32,
    pub fn_name: String,
    pub action: String,
}

pub fn ora_error_info(error: &anyhow::Error) -> Option<OraErrorInfo> {
    let (prefix, db_err) = match error.downcast_ref::<oracle::Error>()? {
        oracle::Error::OciError(e) => ("ORA", e),
        oracle::Error::DpiError(e) => ("DPI", e),
        _ => return None,
    };
    let code = if prefix == "ORA" {
        format!("ORA-{:05}", db_err.code())
    } else {
        format!("DPI-{:04}", db_err.code())
    };
    Some(OraErrorInfo {
        code,
        message: db_err.message().to_string(),
        offset: db_err.offset(),
        fn_name: db_err.fn_name().to_string(),
        action: db_err.action().to_string(),
    })
}

fn is_timeout_error(msg: &str) -> bool {
    msg.contains("timeout") || msg.contains("timed out")
}

fn is_connection_error(msg: &str) -> bool {
    const CONNECTION_ERROR_PATTERNS: &[&str] = &[
        "closed",
        "connection",
        "broken pipe",
        "reset",
        "EOF",
        "TNS",
    ];
    CONNECTION_ERROR_PATTERNS
        .iter()
        .any(|pattern| msg.contains(pattern))
}

pub fn classify(error: &anyhow::Error) -> ErrorKind {
    if let Some(info) = ora_error_info(error) {
        if TIMEOUT_CODES.contains(&info.code.as_str()) {
            return ErrorKind::Timeout;
        }
        if CONNECTION_CODES.contains(&info.code.as_str()) {
            return ErrorKind::Connection;
        }
    }

    let msg = error.to_string();
    if is_timeout_error(&msg) {
        ErrorKind::Timeout
    } else if is_connection_error(&msg) {
        ErrorKind::Connection
    } else {
        ErrorKind::Other
    }
}

/// Host and port of the listener named by an EZConnect string or a TNS
/// descriptor. Net service aliases resolve to themselves on port 1521.
pub fn listener_address(connect_string: &str) -> (String, u16) {
    let s = connect_string.trim();

    if s.starts_with('(') {
        let upper = s.to_ascii_uppercase();
        let host = descriptor_value(s, &upper, "HOST=");
        let port = descriptor_value(s, &upper, "PORT=").and_then(|p| p.parse().ok());
        return (
            host.unwrap_or_else(|| "localhost".to_string()),
            port.unwrap_or(DEFAULT_LISTENER_PORT),
        );
    }

    let ez = s
        .strip_prefix("tcps://")
        .or_else(|| s.strip_prefix("tcp://"))
        .unwrap_or(s)
        .trim_start_matches("//");
    Url::parse(&format!("oracle://{ez}"))
        .ok()
        .and_then(|url| {
            let host = url.host_str()?.to_string();
            Some((host, url.port().unwrap_or(DEFAULT_LISTENER_PORT)))
        })
        .unwrap_or_else(|| ("localhost".to_string(), DEFAULT_LISTENER_PORT))
}

fn descriptor_value(original: &str, upper: &str, key: &str) -> Option<String> {
    let start = upper.find(key)? + key.len();
    let len = upper[start..].find(')')?;
    Some(original[start..start + len].trim().to_string())
}


#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn ezconnect_with_port() {
        assert_eq!(
            listener_address("//db.example.com:1522/ORCLPDB1"),
            ("db.example.com".to_string(), 1522)
        );
    }

    #[test]
    fn ezconnect_without_slashes_or_port() {
        assert_eq!(
            listener_address("dbhost/FREEPDB1"),
            ("dbhost".to_string(), DEFAULT_LISTENER_PORT)
        );
    }

    #[test]
    fn ezconnect_with_protocol() {
        assert_eq!(
            listener_address("tcps://secure-db:2484/svc"),
            ("secure-db".to_string(), 2484)
        );
    }

    #[test]
    fn tns_descriptor() {
        let descriptor = "(DESCRIPTION=(ADDRESS=(PROTOCOL=TCP)(HOST=10.0.0.7)(PORT=1530))(CONNECT_DATA=(SERVICE_NAME=orcl)))";
        assert_eq!(listener_address(descriptor), ("10.0.0.7".to_string(), 1530));
    }

    #[test]
    fn descriptor_without_port_uses_default() {
        let descriptor = "(description=(address=(protocol=tcp)(host=MixedCase))(connect_data=(sid=x)))";
        assert_eq!(
            listener_address(descriptor),
            ("MixedCase".to_string(), DEFAULT_LISTENER_PORT)
        );
    }

    #[test]
    fn classify_by_message() {
        assert_eq!(classify(&anyhow!("call timeout of 30000 ms exceeded")), ErrorKind::Timeout);
        assert_eq!(classify(&anyhow!("ORA-12541: TNS:no listener")), ErrorKind::Connection);
        assert_eq!(classify(&anyhow!("connection reset by peer")), ErrorKind::Connection);
        assert_eq!(
            classify(&anyhow!("ORA-00942: table or view does not exist")),
            ErrorKind::Other
        );
    }

    #[test]
    fn non_oracle_errors_have_no_ora_info() {
        assert!(ora_error_info(&anyhow!("plain failure")).is_none());
    }

    #[test]
    fn bind_values_preserve_order_and_arity() {
        let params = [
            SqlParam::Int(7),
            SqlParam::Float(1.5),
            SqlParam::Text("Region0".to_string()),
        ];
        assert_eq!(bind_values(&params).len(), 3);
    }
}
