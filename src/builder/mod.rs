//! Incremental JSON document builder.
//!
//! [`JsonBuilder`] writes a single JSON document straight into one growable buffer. There is
//! no intermediate object graph: opening a container pushes a frame onto a fixed-size stack
//! and writes the opening brace, adding a field writes the separator, the escaped key and the
//! value. A worker keeps one builder for its whole lifetime and calls [`JsonBuilder::reset`]
//! before each event, so steady-state operation does not allocate.
//!
//! ```
//! use evelog::JsonBuilder;
//!
//! let mut js = JsonBuilder::new();
//! js.open_object().unwrap();
//! js.add_field("proto", "pgsql").unwrap();
//! js.open_object_field("pgsql").unwrap();
//! js.add_field("username", "alice").unwrap();
//! js.close().unwrap();
//! js.close().unwrap();
//! assert_eq!(js.finish().unwrap(), br#"{"proto":"pgsql","pgsql":{"username":"alice"}}"#);
//! ```

mod error;
mod escape;

use std::io::Write as _;

pub use error::{BuilderError, BuilderResult};
use escape::write_escaped;

/// Maximum container nesting depth of a document.
pub const MAX_DEPTH: usize = 16;

/// Initial buffer capacity of a new builder.
const DEFAULT_CAPACITY: usize = 4096;

/// A scalar JSON value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value<'a> {
    Str(&'a str),
    Int(i64),
    Uint(u64),
    /// Non-finite floats are written as `null`.
    Float(f64),
    Bool(bool),
    Null,
}

impl<'a> From<&'a str> for Value<'a> {
    fn from(v: &'a str) -> Self {
        Value::Str(v)
    }
}

impl<'a> From<&'a String> for Value<'a> {
    fn from(v: &'a String) -> Self {
        Value::Str(v.as_str())
    }
}

impl From<i64> for Value<'_> {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value<'_> {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<u64> for Value<'_> {
    fn from(v: u64) -> Self {
        Value::Uint(v)
    }
}

impl From<u32> for Value<'_> {
    fn from(v: u32) -> Self {
        Value::Uint(v.into())
    }
}

impl From<u16> for Value<'_> {
    fn from(v: u16) -> Self {
        Value::Uint(v.into())
    }
}

impl From<f64> for Value<'_> {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value<'_> {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Object,
    Array,
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    kind: Container,
    /// No element has been written into this container yet.
    empty: bool,
}

const EMPTY_FRAME: Frame = Frame {
    kind: Container::Object,
    empty: true,
};

/// A saved builder position, see [`JsonBuilder::mark`].
#[derive(Debug, Clone, Copy)]
pub struct Mark {
    len: usize,
    depth: usize,
    stack: [Frame; MAX_DEPTH],
    complete: bool,
}

/// Reusable incremental serializer for one JSON document.
pub struct JsonBuilder {
    buf: Vec<u8>,
    stack: [Frame; MAX_DEPTH],
    depth: usize,
    /// The root container has been closed.
    complete: bool,
}

impl Default for JsonBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for JsonBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonBuilder")
            .field("len", &self.buf.len())
            .field("depth", &self.depth)
            .field("complete", &self.complete)
            .finish()
    }
}

impl JsonBuilder {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            stack: [EMPTY_FRAME; MAX_DEPTH],
            depth: 0,
            complete: false,
        }
    }

    /// Discard the current document, keeping the buffer allocation.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.depth = 0;
        self.complete = false;
    }

    /// Number of currently open containers.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Start an object at value position (document root or inside an array).
    pub fn open_object(&mut self) -> BuilderResult<()> {
        self.check_value_position()?;
        self.check_push()?;
        self.write_separator();
        self.push(Container::Object);
        Ok(())
    }

    /// Start an array at value position (document root or inside an array).
    pub fn open_array(&mut self) -> BuilderResult<()> {
        self.check_value_position()?;
        self.check_push()?;
        self.write_separator();
        self.push(Container::Array);
        Ok(())
    }

    /// Start an object stored under `key` in the open object.
    pub fn open_object_field(&mut self, key: &str) -> BuilderResult<()> {
        self.check_field_position()?;
        self.check_push()?;
        self.write_key(key);
        self.push(Container::Object);
        Ok(())
    }

    /// Start an array stored under `key` in the open object.
    pub fn open_array_field(&mut self, key: &str) -> BuilderResult<()> {
        self.check_field_position()?;
        self.check_push()?;
        self.write_key(key);
        self.push(Container::Array);
        Ok(())
    }

    /// Write `key: value` into the open object.
    pub fn add_field<'v>(&mut self, key: &str, value: impl Into<Value<'v>>) -> BuilderResult<()> {
        self.check_field_position()?;
        self.write_key(key);
        self.write_scalar(value.into());
        Ok(())
    }

    /// Write a string field from raw protocol bytes.
    ///
    /// Invalid UTF-8 sequences are replaced with U+FFFD; valid input is not copied.
    pub fn add_string_bytes(&mut self, key: &str, value: &[u8]) -> BuilderResult<()> {
        let value = String::from_utf8_lossy(value);
        self.add_field(key, Value::Str(&value))
    }

    /// Append a scalar to the open array.
    pub fn add_value<'v>(&mut self, value: impl Into<Value<'v>>) -> BuilderResult<()> {
        match self.top() {
            Some(Container::Array) => {}
            Some(Container::Object) => {
                return Err(BuilderError::Misuse("value added to an object without a key"));
            }
            None => return Err(BuilderError::Misuse("value added with no open array")),
        }
        self.write_separator();
        self.write_scalar(value.into());
        Ok(())
    }

    /// Append a string to the open array from raw protocol bytes.
    pub fn add_value_bytes(&mut self, value: &[u8]) -> BuilderResult<()> {
        let value = String::from_utf8_lossy(value);
        self.add_value(Value::Str(&value))
    }

    /// Close the innermost open container.
    pub fn close(&mut self) -> BuilderResult<()> {
        let Some(kind) = self.top() else {
            return Err(BuilderError::Misuse("close with no open container"));
        };
        self.depth -= 1;
        self.buf.push(match kind {
            Container::Object => b'}',
            Container::Array => b']',
        });
        if self.depth == 0 {
            self.complete = true;
        }
        Ok(())
    }

    /// The serialized document.
    ///
    /// Only valid once the root container has been closed. The bytes stay in the builder until
    /// the next [`reset`](Self::reset).
    pub fn finish(&self) -> BuilderResult<&[u8]> {
        if self.depth != 0 {
            return Err(BuilderError::Misuse("finish with open containers"));
        }
        if !self.complete {
            return Err(BuilderError::Misuse("finish on an empty document"));
        }
        Ok(&self.buf)
    }

    /// Remember the current position so that everything written after it can be discarded.
    pub fn mark(&self) -> Mark {
        Mark {
            len: self.buf.len(),
            depth: self.depth,
            stack: self.stack,
            complete: self.complete,
        }
    }

    /// Roll the document back to `mark`, including separators and container state.
    ///
    /// A mark taken before a [`reset`](Self::reset) is rejected.
    pub fn rewind(&mut self, mark: &Mark) -> BuilderResult<()> {
        if mark.len > self.buf.len() {
            return Err(BuilderError::Misuse("rewind to a mark past the end of the document"));
        }
        self.buf.truncate(mark.len);
        self.depth = mark.depth;
        self.stack = mark.stack;
        self.complete = mark.complete;
        Ok(())
    }

    fn top(&self) -> Option<Container> {
        self.depth.checked_sub(1).map(|i| self.stack[i].kind)
    }

    fn check_value_position(&self) -> BuilderResult<()> {
        match self.top() {
            None if self.complete => Err(BuilderError::Misuse("document already complete")),
            None | Some(Container::Array) => Ok(()),
            Some(Container::Object) => {
                Err(BuilderError::Misuse("container opened in an object without a key"))
            }
        }
    }

    fn check_field_position(&self) -> BuilderResult<()> {
        match self.top() {
            Some(Container::Object) => Ok(()),
            Some(Container::Array) => Err(BuilderError::Misuse("field added inside an array")),
            None => Err(BuilderError::Misuse("field added with no open object")),
        }
    }

    fn check_push(&self) -> BuilderResult<()> {
        if self.depth >= MAX_DEPTH {
            return Err(BuilderError::DepthExceeded { max: MAX_DEPTH });
        }
        Ok(())
    }

    fn write_separator(&mut self) {
        if let Some(i) = self.depth.checked_sub(1) {
            let frame = &mut self.stack[i];
            if !frame.empty {
                self.buf.push(b',');
            }
            frame.empty = false;
        }
    }

    fn write_key(&mut self, key: &str) {
        self.write_separator();
        self.buf.push(b'"');
        write_escaped(&mut self.buf, key);
        self.buf.extend_from_slice(b"\":");
    }

    fn push(&mut self, kind: Container) {
        self.stack[self.depth] = Frame { kind, empty: true };
        self.depth += 1;
        self.buf.push(match kind {
            Container::Object => b'{',
            Container::Array => b'[',
        });
    }

    fn write_scalar(&mut self, value: Value<'_>) {
        // Writing into a Vec cannot fail.
        match value {
            Value::Str(s) => {
                self.buf.push(b'"');
                write_escaped(&mut self.buf, s);
                self.buf.push(b'"');
            }
            Value::Int(v) => {
                let _ = write!(self.buf, "{v}");
            }
            Value::Uint(v) => {
                let _ = write!(self.buf, "{v}");
            }
            Value::Float(v) if v.is_finite() => {
                let _ = write!(self.buf, "{v}");
            }
            Value::Float(_) | Value::Null => self.buf.extend_from_slice(b"null"),
            Value::Bool(true) => self.buf.extend_from_slice(b"true"),
            Value::Bool(false) => self.buf.extend_from_slice(b"false"),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    fn finished(js: &JsonBuilder) -> serde_json::Value {
        serde_json::from_slice(js.finish().unwrap()).unwrap()
    }

    #[test]
    fn test_nested_document_parses() {
        let mut js = JsonBuilder::new();
        js.open_object().unwrap();
        js.add_field("s", "text").unwrap();
        js.add_field("i", -7i64).unwrap();
        js.add_field("u", 42u64).unwrap();
        js.add_field("f", 1.5).unwrap();
        js.add_field("b", true).unwrap();
        js.add_field("n", Value::Null).unwrap();
        js.open_array_field("list").unwrap();
        js.add_value(1u64).unwrap();
        js.add_value("two").unwrap();
        js.open_object().unwrap();
        js.add_field("three", false).unwrap();
        js.close().unwrap();
        js.open_array().unwrap();
        js.close().unwrap();
        js.close().unwrap();
        js.open_object_field("empty").unwrap();
        js.close().unwrap();
        js.close().unwrap();

        assert_eq!(
            finished(&js),
            json!({
                "s": "text",
                "i": -7,
                "u": 42,
                "f": 1.5,
                "b": true,
                "n": null,
                "list": [1, "two", {"three": false}, []],
                "empty": {}
            })
        );
    }

    #[test]
    fn test_reencoding_preserves_fields() {
        let mut js = JsonBuilder::new();
        js.open_object().unwrap();
        js.add_field("a\"b", "line\nbreak").unwrap();
        js.open_object_field("inner").unwrap();
        js.add_field("x", 1u64).unwrap();
        js.close().unwrap();
        js.close().unwrap();

        let decoded = finished(&js);
        let reencoded = serde_json::to_vec(&decoded).unwrap();
        let redecoded: serde_json::Value = serde_json::from_slice(&reencoded).unwrap();
        assert_eq!(decoded, redecoded);
        assert_eq!(decoded["a\"b"], "line\nbreak");
    }

    #[test]
    fn test_root_array_document() {
        let mut js = JsonBuilder::new();
        js.open_array().unwrap();
        js.add_value("a").unwrap();
        js.add_value(2i32).unwrap();
        js.close().unwrap();
        assert_eq!(js.finish().unwrap(), br#"["a",2]"#);
    }

    #[test]
    fn test_non_finite_float_is_null() {
        let mut js = JsonBuilder::new();
        js.open_object().unwrap();
        js.add_field("nan", f64::NAN).unwrap();
        js.add_field("inf", f64::INFINITY).unwrap();
        js.close().unwrap();
        assert_eq!(js.finish().unwrap(), br#"{"nan":null,"inf":null}"#);
    }

    #[test]
    fn test_string_bytes_lossy() {
        let mut js = JsonBuilder::new();
        js.open_object().unwrap();
        js.add_string_bytes("user", b"al\xffice").unwrap();
        js.close().unwrap();
        assert_eq!(finished(&js)["user"], "al\u{fffd}ice");
    }

    #[rstest]
    #[case::close_empty(|js: &mut JsonBuilder| js.close())]
    #[case::field_without_object(|js: &mut JsonBuilder| js.add_field("k", 1u64))]
    #[case::value_without_array(|js: &mut JsonBuilder| js.add_value(1u64))]
    #[case::finish_empty(|js: &mut JsonBuilder| js.finish().map(|_| ()))]
    #[case::field_in_array(|js: &mut JsonBuilder| {
        js.open_array()?;
        js.add_field("k", 1u64)
    })]
    #[case::value_in_object(|js: &mut JsonBuilder| {
        js.open_object()?;
        js.add_value(1u64)
    })]
    #[case::keyless_object_in_object(|js: &mut JsonBuilder| {
        js.open_object()?;
        js.open_object()
    })]
    #[case::finish_open(|js: &mut JsonBuilder| {
        js.open_object()?;
        js.finish().map(|_| ())
    })]
    #[case::second_root(|js: &mut JsonBuilder| {
        js.open_object()?;
        js.close()?;
        js.open_object()
    })]
    #[case::close_past_root(|js: &mut JsonBuilder| {
        js.open_object()?;
        js.close()?;
        js.close()
    })]
    fn test_misuse(#[case] f: fn(&mut JsonBuilder) -> BuilderResult<()>) {
        let mut js = JsonBuilder::new();
        let err = f(&mut js).unwrap_err();
        assert!(err.is_misuse(), "expected misuse, got {err:?}");
    }

    #[test]
    fn test_usable_after_misuse_and_reset() {
        let mut js = JsonBuilder::new();
        js.open_object().unwrap();
        js.add_field("partial", 1u64).unwrap();
        assert!(js.add_value(2u64).is_err());
        js.close().unwrap();
        assert!(js.close().is_err());

        js.reset();
        assert!(js.is_empty());
        js.open_object().unwrap();
        js.add_field("ok", true).unwrap();
        js.close().unwrap();
        assert_eq!(js.finish().unwrap(), br#"{"ok":true}"#);
    }

    #[test]
    fn test_failed_call_writes_nothing() {
        let mut js = JsonBuilder::new();
        js.open_object().unwrap();
        js.add_field("a", 1u64).unwrap();
        let before = js.len();
        assert!(js.add_value(2u64).is_err());
        assert!(js.open_array().is_err());
        assert_eq!(js.len(), before);
    }

    #[test]
    fn test_depth_limit() {
        let mut js = JsonBuilder::new();
        js.open_object().unwrap();
        for _ in 1..MAX_DEPTH {
            js.open_object_field("d").unwrap();
        }
        assert_eq!(js.depth(), MAX_DEPTH);
        let before = js.len();
        assert_eq!(
            js.open_array_field("too_deep"),
            Err(BuilderError::DepthExceeded { max: MAX_DEPTH })
        );
        assert_eq!(js.len(), before);
        assert_eq!(js.depth(), MAX_DEPTH);

        for _ in 0..MAX_DEPTH {
            js.close().unwrap();
        }
        finished(&js);
    }

    #[test]
    fn test_rewind_removes_empty_sub_object() {
        let mut js = JsonBuilder::new();
        js.open_object().unwrap();
        js.add_field("first", 1u64).unwrap();
        let mark = js.mark();
        js.open_object_field("meta").unwrap();
        js.rewind(&mark).unwrap();
        js.add_field("second", 2u64).unwrap();
        js.close().unwrap();
        assert_eq!(js.finish().unwrap(), br#"{"first":1,"second":2}"#);
    }

    #[test]
    fn test_rewind_first_element_keeps_separators_right() {
        let mut js = JsonBuilder::new();
        js.open_object().unwrap();
        let mark = js.mark();
        js.add_field("dropped", 1u64).unwrap();
        js.rewind(&mark).unwrap();
        js.add_field("kept", 2u64).unwrap();
        js.close().unwrap();
        assert_eq!(js.finish().unwrap(), br#"{"kept":2}"#);
    }

    #[test]
    fn test_rewind_after_reset_rejected() {
        let mut js = JsonBuilder::new();
        js.open_object().unwrap();
        js.add_field("a", 1u64).unwrap();
        let mark = js.mark();
        js.reset();
        assert!(js.rewind(&mark).unwrap_err().is_misuse());
    }
}
