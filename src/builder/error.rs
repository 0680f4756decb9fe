use thiserror::Error;

/// Errors returned by [`JsonBuilder`](super::JsonBuilder).
///
/// Neither variant is caused by the content of a value: strings are always escaped, so only
/// the shape of the call sequence can fail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuilderError {
    /// The container stack was used out of order (a programming error).
    #[error("Builder misuse: {0}")]
    Misuse(&'static str),

    /// Opening another container would exceed the nesting limit.
    #[error("Maximum nesting depth of {max} exceeded")]
    DepthExceeded { max: usize },
}

impl BuilderError {
    pub fn is_misuse(&self) -> bool {
        matches!(self, BuilderError::Misuse(_))
    }
}

pub type BuilderResult<T> = Result<T, BuilderError>;
