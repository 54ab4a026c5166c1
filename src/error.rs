use std::io;

use thiserror::Error;

/// Errors surfaced by connections and the engine.
///
/// Validation failures on inbound records (bad authentication, replay,
/// stale epoch, malformed framing) are deliberately absent. Those are
/// dropped inside the record layer and only counted via
/// [`StatsSink`](crate::StatsSink).
#[derive(Debug, Error)]
pub enum Error {
    /// Input ended before a complete structure could be parsed.
    #[error("Parse incomplete")]
    ParseIncomplete,

    /// Input could not be parsed.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// A handshake message arrived that the protocol does not allow here.
    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    /// The peer failed a security check (Finished, version, key share).
    #[error("Security error: {0}")]
    SecurityError(String),

    /// A cryptographic primitive failed.
    #[error("Crypto error: {0}")]
    CryptoError(String),

    /// A handshake or flight timer expired.
    #[error("Timeout: {0}")]
    Timeout(&'static str),

    /// The peer requested a cookie more often than tolerated.
    #[error("Too many cookie requests: {0}")]
    CookieAbuse(usize),

    /// Too many pending inbound handshake messages.
    #[error("Receive queue full")]
    ReceiveQueueFull,

    /// Too many outgoing datagrams are queued.
    #[error("Transmit queue full")]
    TransmitQueueFull,

    /// Application data does not fit a single record.
    #[error("Payload too large: {0} > {1}")]
    PayloadTooLarge(usize, usize),

    /// The operation requires an established connection.
    #[error("Not connected")]
    NotConnected,

    /// The connection is closing, closed or failed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The epoch counter would wrap.
    #[error("Epoch exhausted")]
    EpochExhausted,

    /// The 48-bit sequence space of an epoch is used up.
    #[error("Sequence numbers exhausted in epoch {0}")]
    SequenceExhausted(u16),

    /// New handshakes are refused while too many are half-open.
    #[error("Too many half-open connections")]
    HalfOpenLimit,

    /// The engine holds the maximum number of connections.
    #[error("Too many connections")]
    ConnectionLimit,

    /// Invalid configuration.
    #[error("Config error: {0}")]
    ConfigError(String),

    /// The random source could not produce bytes.
    #[error("Randomness failure: {0}")]
    RandomnessFailure(String),

    /// Socket level failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl<'a> From<nom::Err<nom::error::Error<&'a [u8]>>> for Error {
    fn from(value: nom::Err<nom::error::Error<&'a [u8]>>) -> Self {
        match value {
            nom::Err::Incomplete(_) => Error::ParseIncomplete,
            nom::Err::Error(e) | nom::Err::Failure(e) => {
                Error::ParseError(format!("{:?}", e.code))
            }
        }
    }
}
