//! FTP control-channel transaction logger.

use super::{
    Anomalies, Extractor, MAX_ARRAY_ITEMS, MAX_FIELD_LEN, TransactionRef, add_bytes, nested_array,
};
use crate::builder::{BuilderResult, JsonBuilder};

/// One command and the replies the server sent for it.
#[derive(Debug, Clone, Default)]
pub struct FtpTransaction {
    pub command: Option<Vec<u8>>,
    pub command_data: Option<Vec<u8>>,
    pub replies: Vec<FtpReply>,
    /// Data-channel port announced by a PASV/EPSV reply or PORT/EPRT command.
    pub dynamic_port: Option<u16>,
}

#[derive(Debug, Clone, Default)]
pub struct FtpReply {
    /// Three-digit reply code as sent on the wire.
    pub code: Vec<u8>,
    pub text: Vec<u8>,
}

impl FtpReply {
    pub fn new(code: &str, text: &str) -> Self {
        Self {
            code: code.as_bytes().to_vec(),
            text: text.as_bytes().to_vec(),
        }
    }
}

/// Extractor for [`FtpTransaction`].
#[derive(Debug, Clone, Default)]
pub struct FtpExtractor;

impl Extractor for FtpExtractor {
    fn extract(
        &self,
        tx: TransactionRef<'_>,
        js: &mut JsonBuilder,
        anomalies: &mut Anomalies,
    ) -> BuilderResult<bool> {
        let TransactionRef::Ftp(tx) = tx else {
            anomalies.record("transaction");
            return Ok(false);
        };

        let has_command = add_bytes(js, "command", tx.command.as_deref())?;
        let mut emitted = has_command;
        emitted |= add_bytes(js, "command_data", tx.command_data.as_deref())?;

        let replies = &tx.replies[..tx.replies.len().min(MAX_ARRAY_ITEMS)];

        emitted |= nested_array(js, "reply", |js| {
            let mut any = false;
            for reply in replies.iter().filter(|r| !r.text.is_empty()) {
                js.add_value_bytes(&reply.text[..reply.text.len().min(MAX_FIELD_LEN)])?;
                any = true;
            }
            Ok(any)
        })?;

        emitted |= nested_array(js, "completion_code", |js| {
            let mut any = false;
            for reply in replies {
                match reply_code(&reply.code) {
                    Some(code) => {
                        js.add_value(code)?;
                        any = true;
                    }
                    None => anomalies.record("completion_code"),
                }
            }
            Ok(any)
        })?;

        if tx.replies.len() > MAX_ARRAY_ITEMS {
            js.add_field("reply_truncated", true)?;
            emitted = true;
        }

        if let Some(port) = tx.dynamic_port {
            js.add_field("dynamic_port", port)?;
            emitted = true;
        }

        if has_command {
            let received = if tx.replies.is_empty() { "no" } else { "yes" };
            js.add_field("reply_received", received)?;
        }

        Ok(emitted)
    }
}

/// A reply code is three ASCII digits with a first digit between 1 and 5.
fn reply_code(code: &[u8]) -> Option<&str> {
    match code {
        [b'1'..=b'5', b'0'..=b'9', b'0'..=b'9'] => std::str::from_utf8(code).ok(),
        _ => None,
    }
}
