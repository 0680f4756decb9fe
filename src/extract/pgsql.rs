//! PostgreSQL transaction logger.
//!
//! A transaction is one frontend request with whatever the backend answered. Any part may be
//! missing: the startup message is only seen once per connection, and the response is absent
//! when the flow ended before the backend replied.

use super::{Anomalies, Extractor, TransactionRef, add_bytes, nested_object};
use crate::builder::{BuilderResult, JsonBuilder};

/// Length of a SQLSTATE error code.
const SQLSTATE_LEN: usize = 5;

#[derive(Debug, Clone, Default)]
pub struct PgsqlTransaction {
    pub tx_id: u64,
    pub startup: Option<StartupMessage>,
    /// Text of a simple query message.
    pub query: Option<Vec<u8>>,
    /// Cleartext or hashed password message.
    pub password: Option<Vec<u8>>,
    pub response: Option<PgsqlResponse>,
}

/// Parameters of the frontend startup message.
#[derive(Debug, Clone, Default)]
pub struct StartupMessage {
    pub user: Option<Vec<u8>>,
    pub database: Option<Vec<u8>>,
    pub application_name: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Default)]
pub struct PgsqlResponse {
    /// Command tag of the CommandComplete message, e.g. `SELECT 3`.
    pub command_completed: Option<Vec<u8>>,
    /// Number of DataRow messages seen.
    pub data_rows: Option<u64>,
    pub error: Option<PgsqlErrorResponse>,
}

/// Fields of an ErrorResponse message.
#[derive(Debug, Clone, Default)]
pub struct PgsqlErrorResponse {
    pub severity: Option<Vec<u8>>,
    pub code: Option<Vec<u8>>,
    pub message: Option<Vec<u8>>,
}

/// Extractor for [`PgsqlTransaction`].
#[derive(Debug, Clone, Default)]
pub struct PgsqlExtractor {
    log_passwords: bool,
}

impl PgsqlExtractor {
    pub fn new(log_passwords: bool) -> Self {
        Self { log_passwords }
    }
}

impl Extractor for PgsqlExtractor {
    fn extract(
        &self,
        tx: TransactionRef<'_>,
        js: &mut JsonBuilder,
        anomalies: &mut Anomalies,
    ) -> BuilderResult<bool> {
        let TransactionRef::Pgsql(tx) = tx else {
            anomalies.record("transaction");
            return Ok(false);
        };

        let mut emitted = false;

        if let Some(startup) = &tx.startup {
            emitted |= add_bytes(js, "username", startup.user.as_deref())?;
            emitted |= add_bytes(js, "database", startup.database.as_deref())?;
            emitted |= add_bytes(js, "application_name", startup.application_name.as_deref())?;
        }

        emitted |= add_bytes(js, "query", tx.query.as_deref())?;

        if self.log_passwords {
            emitted |= add_bytes(js, "password", tx.password.as_deref())?;
        }

        if let Some(response) = &tx.response {
            emitted |= log_response(response, js, anomalies)?;
        }

        Ok(emitted)
    }
}

fn log_response(
    response: &PgsqlResponse,
    js: &mut JsonBuilder,
    anomalies: &mut Anomalies,
) -> BuilderResult<bool> {
    let mut emitted = add_bytes(js, "command_completed", response.command_completed.as_deref())?;

    if let Some(rows) = response.data_rows {
        js.add_field("rows", rows)?;
        emitted = true;
    }

    if let Some(error) = &response.error {
        emitted |= nested_object(js, "error", |js| {
            let mut any = add_bytes(js, "severity", error.severity.as_deref())?;
            match error.code.as_deref() {
                Some(code) if is_sqlstate(code) => any |= add_bytes(js, "code", Some(code))?,
                Some(_) => anomalies.record("error.code"),
                None => {}
            }
            any |= add_bytes(js, "message", error.message.as_deref())?;
            Ok(any)
        })?;
    }

    Ok(emitted)
}

fn is_sqlstate(code: &[u8]) -> bool {
    code.len() == SQLSTATE_LEN && code.iter().all(u8::is_ascii_alphanumeric)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn run(extractor: &PgsqlExtractor, tx: &PgsqlTransaction) -> (bool, serde_json::Value, u64) {
        let mut js = JsonBuilder::new();
        let mut anomalies = Anomalies::new();
        js.open_object().unwrap();
        let emitted = extractor
            .extract(TransactionRef::from(tx), &mut js, &mut anomalies)
            .unwrap();
        js.close().unwrap();
        let value = serde_json::from_slice(js.finish().unwrap()).unwrap();
        (emitted, value, anomalies.count())
    }

    fn startup(user: &str, database: &str) -> StartupMessage {
        StartupMessage {
            user: Some(user.as_bytes().to_vec()),
            database: Some(database.as_bytes().to_vec()),
            application_name: None,
        }
    }

    #[test]
    fn test_username_and_database_only() {
        let tx = PgsqlTransaction {
            startup: Some(startup("alice", "app")),
            ..Default::default()
        };
        let (emitted, value, _) = run(&PgsqlExtractor::default(), &tx);
        assert!(emitted);
        assert_eq!(value, json!({"username": "alice", "database": "app"}));
        assert!(value.get("query").is_none());
    }

    #[test]
    fn test_all_absent_emits_nothing() {
        let (emitted, value, anomalies) = run(&PgsqlExtractor::default(), &PgsqlTransaction::default());
        assert!(!emitted);
        assert_eq!(value, json!({}));
        assert_eq!(anomalies, 0);
    }

    #[test]
    fn test_password_only_logged_when_enabled() {
        let tx = PgsqlTransaction {
            password: Some(b"hunter2".to_vec()),
            ..Default::default()
        };
        let (emitted, _, _) = run(&PgsqlExtractor::new(false), &tx);
        assert!(!emitted);

        let (emitted, value, _) = run(&PgsqlExtractor::new(true), &tx);
        assert!(emitted);
        assert_eq!(value, json!({"password": "hunter2"}));
    }

    #[test]
    fn test_query_with_response() {
        let tx = PgsqlTransaction {
            tx_id: 3,
            query: Some(b"SELECT * FROM t WHERE name = 'x\"y'".to_vec()),
            response: Some(PgsqlResponse {
                command_completed: Some(b"SELECT 2".to_vec()),
                data_rows: Some(2),
                error: None,
            }),
            ..Default::default()
        };
        let (_, value, _) = run(&PgsqlExtractor::default(), &tx);
        assert_eq!(
            value,
            json!({
                "query": "SELECT * FROM t WHERE name = 'x\"y'",
                "command_completed": "SELECT 2",
                "rows": 2
            })
        );
    }

    #[test]
    fn test_error_response_nested() {
        let tx = PgsqlTransaction {
            response: Some(PgsqlResponse {
                error: Some(PgsqlErrorResponse {
                    severity: Some(b"ERROR".to_vec()),
                    code: Some(b"42P01".to_vec()),
                    message: Some(b"relation \"t\" does not exist".to_vec()),
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        let (emitted, value, anomalies) = run(&PgsqlExtractor::default(), &tx);
        assert!(emitted);
        assert_eq!(anomalies, 0);
        assert_eq!(
            value,
            json!({"error": {"severity": "ERROR", "code": "42P01", "message": "relation \"t\" does not exist"}})
        );
    }

    #[test]
    fn test_malformed_sqlstate_omitted_and_counted() {
        let tx = PgsqlTransaction {
            response: Some(PgsqlResponse {
                error: Some(PgsqlErrorResponse {
                    severity: Some(b"FATAL".to_vec()),
                    code: Some(b"4\x00\n".to_vec()),
                    message: None,
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        let (emitted, value, anomalies) = run(&PgsqlExtractor::default(), &tx);
        assert!(emitted);
        assert_eq!(anomalies, 1);
        assert_eq!(value, json!({"error": {"severity": "FATAL"}}));
    }

    #[test]
    fn test_error_with_only_bad_code_leaves_no_object() {
        let tx = PgsqlTransaction {
            response: Some(PgsqlResponse {
                error: Some(PgsqlErrorResponse {
                    code: Some(b"toolongcode".to_vec()),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        let (emitted, value, anomalies) = run(&PgsqlExtractor::default(), &tx);
        assert!(!emitted);
        assert_eq!(anomalies, 1);
        assert_eq!(value, json!({}));
    }

    #[test]
    fn test_wrong_variant_is_anomaly() {
        let ftp = crate::extract::FtpTransaction::default();
        let mut js = JsonBuilder::new();
        let mut anomalies = Anomalies::new();
        js.open_object().unwrap();
        let emitted = PgsqlExtractor::default()
            .extract(TransactionRef::from(&ftp), &mut js, &mut anomalies)
            .unwrap();
        assert!(!emitted);
        assert_eq!(anomalies.last_field(), Some("transaction"));
    }
}
