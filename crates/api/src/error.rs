//! Weathervane error types.

/// The core weathervane error type. This type is used in the wire codec
/// and in the client apis.
#[derive(Debug, thiserror::Error)]
pub enum WvError {
    /// A request or response could not be decoded from its wire form.
    #[error("codec error: {0}")]
    Codec(Box<str>),

    /// An io failure on the underlying transport.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The remote peer answered with an error response line.
    #[error("rejected: {0}")]
    Rejected(Box<str>),
}

impl WvError {
    /// Construct a codec error with display context.
    pub fn codec<C: std::fmt::Display>(ctx: C) -> Self {
        Self::Codec(ctx.to_string().into_boxed_str())
    }

    /// Construct a rejection error from a response line.
    pub fn rejected<C: std::fmt::Display>(line: C) -> Self {
        Self::Rejected(line.to_string().into_boxed_str())
    }
}

/// The core weathervane result type.
pub type WvResult<T> = Result<T, WvError>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn error_display() {
        assert_eq!(
            "codec error: bad start line",
            WvError::codec("bad start line").to_string().as_str(),
        );
        assert_eq!(
            "rejected: 404 Data Not Found",
            WvError::rejected("404 Data Not Found").to_string().as_str(),
        );
    }

    #[test]
    fn ensure_wverror_type_is_send_and_sync() {
        fn ensure<T: std::fmt::Display + Send + Sync>(_t: T) {}
        ensure(WvError::codec("bla"));
    }
}
