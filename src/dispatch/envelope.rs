use std::fmt::Write;

use super::CompletionEvent;
use crate::{
    builder::{BuilderError, BuilderResult, JsonBuilder},
    extract::Anomalies,
    registry::Registration,
};

/// Rendering of the envelope `timestamp` field.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f%z";

/// Write the complete event for `event` into `js`.
///
/// Returns `Ok(false)` without a finished document when the extractor had nothing to log.
/// `scratch` is reused for rendering the timestamp.
pub(super) fn write_event(
    js: &mut JsonBuilder,
    scratch: &mut String,
    event: &CompletionEvent<'_>,
    registration: &Registration,
    anomalies: &mut Anomalies,
) -> BuilderResult<bool> {
    let proto = registration.proto();

    js.reset();
    js.open_object()?;

    scratch.clear();
    // Writing into a String cannot fail.
    let _ = write!(scratch, "{}", event.timestamp.format(TIMESTAMP_FORMAT));
    js.add_field("timestamp", scratch.as_str())?;
    js.add_field("flow_id", event.flow_id)?;

    if let Some(flow) = &event.flow {
        scratch.clear();
        let _ = write!(scratch, "{}", flow.src_ip);
        js.add_field("src_ip", scratch.as_str())?;
        js.add_field("src_port", flow.src_port)?;
        scratch.clear();
        let _ = write!(scratch, "{}", flow.dest_ip);
        js.add_field("dest_ip", scratch.as_str())?;
        js.add_field("dest_port", flow.dest_port)?;
    }

    js.add_field("proto", proto.as_str())?;

    let mark = js.mark();
    js.open_object_field(proto.as_str())?;
    let depth = js.depth();
    let len = js.len();

    let logged = registration.extractor().extract(event.tx, js, anomalies)?;
    // An extractor may claim output without writing any; the object would be empty.
    if !logged || (js.len() == len && js.depth() == depth) {
        js.rewind(&mark)?;
        return Ok(false);
    }
    if js.depth() != depth {
        return Err(BuilderError::Misuse("extractor left the container stack unbalanced"));
    }

    js.close()?;
    js.close()?;
    Ok(true)
}
