use thiserror::Error;

/// The closed set of failure kinds a decode or encode call can produce.
///
/// Every variant carries a human-readable context string; callers that need
/// structured matching should match on the variant, not parse the message.
#[derive(Debug, Error, Clone)]
pub enum Error {
    /// Unknown Varcode or unknown table.
    #[error("not found: {0}")]
    NotFound(String),

    /// Value type does not match the Varinfo type.
    #[error("type mismatch: {0}")]
    Type(String),

    /// Buffer too short for the expected data.
    #[error("buffer too short: {0}")]
    TooLong(String),

    /// Malformed wire data.
    #[error("parse error: {0}")]
    Parse(String),

    /// Structural invariant violated.
    #[error("consistency error: {0}")]
    Consistency(String),

    /// Value outside the encodable range of its Varinfo.
    #[error("value out of domain: {0}")]
    Domain(String),

    /// Opcode or modifier not (yet) supported.
    #[error("unimplemented: {0}")]
    Unimplemented(String),

    /// Underlying I/O or allocation failure, surfaced unchanged.
    #[error("system error: {0}")]
    System(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<crate::bits::Error> for Error {
    fn from(err: crate::bits::Error) -> Self {
        match err {
            crate::bits::Error::EndOfBuffer(msg) => Error::Parse(msg),
            crate::bits::Error::Domain(msg) => Error::Domain(msg),
            crate::bits::Error::Parse(msg) => Error::Parse(msg),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::System(err.to_string())
    }
}
