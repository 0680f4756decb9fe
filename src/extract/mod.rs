//! Per-protocol metadata extraction.
//!
//! Each application protocol has one [`Extractor`] that knows the concrete shape of its
//! transaction record. The dispatcher opens an object for the protocol and the extractor fills
//! it. Extractors do no I/O, cap every attacker-controlled size, and degrade field by field:
//! a value that cannot be decoded is skipped and counted in [`Anomalies`].

pub mod ftp;
pub mod pgsql;
pub mod ssh;

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

pub use ftp::{FtpExtractor, FtpReply, FtpTransaction};
pub use pgsql::{PgsqlErrorResponse, PgsqlExtractor, PgsqlResponse, PgsqlTransaction, StartupMessage};
pub use ssh::{SshBanner, SshExtractor, SshTransaction};

use crate::builder::{BuilderResult, JsonBuilder};

/// Longest string value, in bytes, an extractor writes for a single field.
pub const MAX_FIELD_LEN: usize = 4096;

/// Most elements an extractor writes into a single array.
pub const MAX_ARRAY_ITEMS: usize = 64;

/// Application protocols with a transaction logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppProto {
    Pgsql,
    Ftp,
    Ssh,
}

impl AppProto {
    pub const COUNT: usize = 3;
    pub const ALL: [AppProto; Self::COUNT] = [AppProto::Pgsql, AppProto::Ftp, AppProto::Ssh];

    /// Protocol tag used in the envelope and as the metadata object key.
    pub fn as_str(&self) -> &'static str {
        match self {
            AppProto::Pgsql => "pgsql",
            AppProto::Ftp => "ftp",
            AppProto::Ssh => "ssh",
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for AppProto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppProto {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AppProto::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown application protocol '{s}'"))
    }
}

/// Borrowed view of a completed transaction, tagged with its protocol.
#[derive(Debug, Clone, Copy)]
pub enum TransactionRef<'a> {
    Pgsql(&'a PgsqlTransaction),
    Ftp(&'a FtpTransaction),
    Ssh(&'a SshTransaction),
}

impl TransactionRef<'_> {
    pub fn proto(&self) -> AppProto {
        match self {
            TransactionRef::Pgsql(_) => AppProto::Pgsql,
            TransactionRef::Ftp(_) => AppProto::Ftp,
            TransactionRef::Ssh(_) => AppProto::Ssh,
        }
    }
}

impl<'a> From<&'a PgsqlTransaction> for TransactionRef<'a> {
    fn from(tx: &'a PgsqlTransaction) -> Self {
        TransactionRef::Pgsql(tx)
    }
}

impl<'a> From<&'a FtpTransaction> for TransactionRef<'a> {
    fn from(tx: &'a FtpTransaction) -> Self {
        TransactionRef::Ftp(tx)
    }
}

impl<'a> From<&'a SshTransaction> for TransactionRef<'a> {
    fn from(tx: &'a SshTransaction) -> Self {
        TransactionRef::Ssh(tx)
    }
}

/// Owned transaction, for handing a completed record to a worker lane.
#[derive(Debug, Clone)]
pub enum TransactionRecord {
    Pgsql(PgsqlTransaction),
    Ftp(FtpTransaction),
    Ssh(SshTransaction),
}

impl TransactionRecord {
    pub fn as_tx(&self) -> TransactionRef<'_> {
        match self {
            TransactionRecord::Pgsql(tx) => TransactionRef::Pgsql(tx),
            TransactionRecord::Ftp(tx) => TransactionRef::Ftp(tx),
            TransactionRecord::Ssh(tx) => TransactionRef::Ssh(tx),
        }
    }
}

impl From<PgsqlTransaction> for TransactionRecord {
    fn from(tx: PgsqlTransaction) -> Self {
        TransactionRecord::Pgsql(tx)
    }
}

impl From<FtpTransaction> for TransactionRecord {
    fn from(tx: FtpTransaction) -> Self {
        TransactionRecord::Ftp(tx)
    }
}

impl From<SshTransaction> for TransactionRecord {
    fn from(tx: SshTransaction) -> Self {
        TransactionRecord::Ssh(tx)
    }
}

/// Tally of fields an extractor had to skip because their value was malformed.
#[derive(Debug, Default)]
pub struct Anomalies {
    count: u64,
    last_field: Option<&'static str>,
}

impl Anomalies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `field` was omitted.
    pub fn record(&mut self, field: &'static str) {
        self.count += 1;
        self.last_field = Some(field);
        tracing::trace!(field, "Omitting malformed transaction field");
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn last_field(&self) -> Option<&'static str> {
        self.last_field
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Writes one protocol's transaction metadata into an open object.
///
/// Returns `Ok(true)` if at least one field was written, `Ok(false)` if the transaction carried
/// nothing to log. Builder errors are returned so the dispatcher can abandon the record.
pub trait Extractor: Send + Sync {
    fn extract(
        &self,
        tx: TransactionRef<'_>,
        js: &mut JsonBuilder,
        anomalies: &mut Anomalies,
    ) -> BuilderResult<bool>;
}

/// Adapts a plain function or closure to [`Extractor`].
pub struct FnExtractor<F>(F);

impl<F> FnExtractor<F>
where
    F: Fn(TransactionRef<'_>, &mut JsonBuilder, &mut Anomalies) -> BuilderResult<bool>
        + Send
        + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> Extractor for FnExtractor<F>
where
    F: Fn(TransactionRef<'_>, &mut JsonBuilder, &mut Anomalies) -> BuilderResult<bool>
        + Send
        + Sync,
{
    fn extract(
        &self,
        tx: TransactionRef<'_>,
        js: &mut JsonBuilder,
        anomalies: &mut Anomalies,
    ) -> BuilderResult<bool> {
        (self.0)(tx, js, anomalies)
    }
}

/// Write a non-empty byte string field, truncated to [`MAX_FIELD_LEN`].
pub(crate) fn add_bytes(js: &mut JsonBuilder, key: &str, value: Option<&[u8]>) -> BuilderResult<bool> {
    match value {
        Some(v) if !v.is_empty() => {
            js.add_string_bytes(key, &v[..v.len().min(MAX_FIELD_LEN)])?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

/// Write an object under `key`, filled by `f`. Nothing is left behind if `f` writes no field.
pub(crate) fn nested_object(
    js: &mut JsonBuilder,
    key: &str,
    f: impl FnOnce(&mut JsonBuilder) -> BuilderResult<bool>,
) -> BuilderResult<bool> {
    let mark = js.mark();
    js.open_object_field(key)?;
    if f(js)? {
        js.close()?;
        Ok(true)
    } else {
        js.rewind(&mark)?;
        Ok(false)
    }
}

/// Write an array under `key`, filled by `f`. Nothing is left behind if `f` writes no value.
pub(crate) fn nested_array(
    js: &mut JsonBuilder,
    key: &str,
    f: impl FnOnce(&mut JsonBuilder) -> BuilderResult<bool>,
) -> BuilderResult<bool> {
    let mark = js.mark();
    js.open_array_field(key)?;
    if f(js)? {
        js.close()?;
        Ok(true)
    } else {
        js.rewind(&mark)?;
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("pgsql", AppProto::Pgsql)]
    #[case("FTP", AppProto::Ftp)]
    #[case("ssh", AppProto::Ssh)]
    fn test_app_proto_parsing(#[case] input: &str, #[case] expected: AppProto) {
        assert_eq!(input.parse::<AppProto>().unwrap(), expected);
        assert_eq!(expected.to_string(), input.to_ascii_lowercase());
    }

    #[test]
    fn test_app_proto_unknown() {
        assert!("smb".parse::<AppProto>().is_err());
    }

    #[test]
    fn test_app_proto_indices_are_dense() {
        for (i, proto) in AppProto::ALL.iter().enumerate() {
            assert_eq!(proto.index(), i);
        }
    }

    #[test]
    fn test_record_proto_matches_ref() {
        let record = TransactionRecord::from(FtpTransaction::default());
        assert_eq!(record.as_tx().proto(), AppProto::Ftp);
    }

    #[test]
    fn test_add_bytes_truncates() {
        let long = vec![b'a'; MAX_FIELD_LEN + 100];
        let mut js = JsonBuilder::new();
        js.open_object().unwrap();
        assert!(add_bytes(&mut js, "q", Some(&long)).unwrap());
        assert!(!add_bytes(&mut js, "empty", Some(b"")).unwrap());
        assert!(!add_bytes(&mut js, "none", None).unwrap());
        js.close().unwrap();

        let v: serde_json::Value = serde_json::from_slice(js.finish().unwrap()).unwrap();
        assert_eq!(v["q"].as_str().unwrap().len(), MAX_FIELD_LEN);
        assert!(v.get("empty").is_none());
    }

    #[test]
    fn test_nested_object_rewinds_when_empty() {
        let mut js = JsonBuilder::new();
        js.open_object().unwrap();
        assert!(!nested_object(&mut js, "inner", |_| Ok(false)).unwrap());
        assert!(nested_array(&mut js, "list", |js| {
            js.add_value(1u64)?;
            Ok(true)
        })
        .unwrap());
        js.close().unwrap();
        assert_eq!(js.finish().unwrap(), br#"{"list":[1]}"#);
    }

    #[test]
    fn test_fn_extractor() {
        let extractor = FnExtractor::new(|tx: TransactionRef<'_>, js: &mut JsonBuilder, _: &mut Anomalies| {
            js.add_field("proto", tx.proto().as_str())?;
            Ok(true)
        });
        let tx = SshTransaction::default();
        let mut js = JsonBuilder::new();
        js.open_object().unwrap();
        assert!(extractor
            .extract(TransactionRef::from(&tx), &mut js, &mut Anomalies::new())
            .unwrap());
        js.close().unwrap();
        assert_eq!(js.finish().unwrap(), br#"{"proto":"ssh"}"#);
    }
}
