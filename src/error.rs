use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by the engine, one variant per failure domain.
///
/// Variants carry a message string rather than a source error so values stay
/// `Clone` and can ride inside broadcast [`Event`](crate::client::Event)s.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum Error {
    /// Connect, TLS handshake, name resolution, or read failures.
    #[error("connection error: {0}")]
    Connection(String),

    /// A framed write to the device failed.
    #[error("write error: {0}")]
    Write(String),

    /// The session is in the wrong state for the operation, or a response
    /// could not be interpreted.
    #[error("session error: {0}")]
    Session(String),

    /// A request could not be correlated or timed out.
    #[error("request error: {0}")]
    Request(String),

    /// The receiver refused to launch an application.
    #[error("launch error: {0}")]
    Launch(String),

    /// The receiver refused to load media.
    #[error("load error: {0}")]
    Load(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::Connection(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Error {
        Error::Session(format!("json: {err}"))
    }
}

impl From<protobuf::Error> for Error {
    fn from(err: protobuf::Error) -> Error {
        Error::Session(format!("protobuf: {err}"))
    }
}
