//! SSH banner logger.

use super::{Anomalies, Extractor, TransactionRef, add_bytes, nested_object};
use crate::builder::{BuilderResult, JsonBuilder};

/// Banner exchange of one SSH connection. Either side may not have been seen yet.
#[derive(Debug, Clone, Default)]
pub struct SshTransaction {
    pub client: Option<SshBanner>,
    pub server: Option<SshBanner>,
}

/// Fields of an `SSH-protoversion-softwareversion` identification string.
#[derive(Debug, Clone, Default)]
pub struct SshBanner {
    pub proto_version: Vec<u8>,
    pub software_version: Vec<u8>,
}

impl SshBanner {
    pub fn new(proto_version: &str, software_version: &str) -> Self {
        Self {
            proto_version: proto_version.as_bytes().to_vec(),
            software_version: software_version.as_bytes().to_vec(),
        }
    }
}

/// Extractor for [`SshTransaction`].
#[derive(Debug, Clone, Default)]
pub struct SshExtractor;

impl Extractor for SshExtractor {
    fn extract(
        &self,
        tx: TransactionRef<'_>,
        js: &mut JsonBuilder,
        anomalies: &mut Anomalies,
    ) -> BuilderResult<bool> {
        let TransactionRef::Ssh(tx) = tx else {
            anomalies.record("transaction");
            return Ok(false);
        };

        let mut emitted = false;
        if let Some(client) = &tx.client {
            emitted |= log_banner(js, "client", client, anomalies)?;
        }
        if let Some(server) = &tx.server {
            emitted |= log_banner(js, "server", server, anomalies)?;
        }
        Ok(emitted)
    }
}

fn log_banner(
    js: &mut JsonBuilder,
    key: &str,
    banner: &SshBanner,
    anomalies: &mut Anomalies,
) -> BuilderResult<bool> {
    nested_object(js, key, |js| {
        let mut any = false;
        // An empty version means the banner was not parsed yet, not that it is malformed.
        if !banner.proto_version.is_empty() {
            if is_proto_version(&banner.proto_version) {
                any |= add_bytes(js, "proto_version", Some(&banner.proto_version))?;
            } else {
                anomalies.record("proto_version");
            }
        }
        any |= add_bytes(js, "software_version", Some(&banner.software_version))?;
        Ok(any)
    })
}

/// Protocol versions are dotted decimal numbers such as `2.0` or `1.99`.
fn is_proto_version(v: &[u8]) -> bool {
    v.split(|b| *b == b'.')
        .all(|part| !part.is_empty() && part.iter().all(u8::is_ascii_digit))
}
