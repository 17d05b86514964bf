use std::io;

use thiserror::Error;

use crate::decoder::DecodeError;

/// Main error type for the sweepd server and client.
///
/// Per-connection failures (`Protocol`, `Io`) are contained to the connection
/// that produced them; `Config` and `Socket::Bind` abort startup.
#[derive(Debug, Error)]
pub enum Error {
   /// I/O error occurred during file or network operations.
   #[error("io error: {0}")]
   Io(#[from] io::Error),

   /// Invalid construction parameters.
   #[error("config error: {0}")]
   Config(#[from] ConfigError),

   /// Malformed or truncated frame on the wire.
   #[error("protocol error: {0}")]
   Protocol(#[from] ProtocolError),

   /// Socket setup or accept failure.
   #[error("socket error: {0}")]
   Socket(#[from] SocketError),

   /// The decoder could not produce a sweep.
   #[error("decode error: {0}")]
   Decode(#[from] DecodeError),

   /// JSON serialization or deserialization error occurred.
   #[error("json error: {0}")]
   Json(#[from] serde_json::Error),

   /// Postcard serialization or deserialization error occurred.
   #[error("postcard error: {0}")]
   Postcard(#[from] postcard::Error),

   /// The server answered a request with an explicit error reply.
   #[error("server reported: {reason}")]
   Remote { reason: String },

   /// Unexpected reply kind received for an operation.
   #[error("unexpected reply from server during {0}")]
   UnexpectedReply(&'static str),

   /// Server error occurred during a specific operation.
   #[error("server error during {op}: {reason}")]
   Server { op: &'static str, reason: String },
}

/// Errors raised while framing messages on a stream socket.
#[derive(Debug, Error)]
pub enum ProtocolError {
   /// The declared frame length exceeds the configured maximum.
   #[error("message too large: {0} bytes")]
   MessageTooLarge(usize),

   /// The peer closed the connection in the middle of a frame.
   #[error("connection closed mid-frame: expected {expected} bytes, got {got}")]
   Truncated { expected: usize, got: usize },

   /// Failed to read data from the socket.
   #[error("failed to read: {0}")]
   Read(#[source] io::Error),

   /// Failed to write data to the socket.
   #[error("failed to write: {0}")]
   Write(#[source] io::Error),

   /// A control record could not be parsed.
   #[error("malformed request: {0}")]
   Malformed(#[source] serde_json::Error),

   /// A reply carried an unknown kind byte.
   #[error("unknown reply kind: {0:#04x}")]
   UnknownReplyKind(u8),

   /// A reply frame carried no kind byte at all.
   #[error("empty reply frame")]
   Empty,
}

/// Errors that can occur during socket operations.
#[derive(Debug, Error)]
pub enum SocketError {
   #[error("failed to bind {addr}: {source}")]
   Bind {
      addr:   String,
      #[source]
      source: io::Error,
   },

   #[error("failed to connect to {addr}: {source}")]
   Connect {
      addr:   String,
      #[source]
      source: io::Error,
   },

   #[error("accept failed: {0}")]
   Accept(#[source] io::Error),

   #[error("send timed out after {0} ms")]
   Timeout(u64),
}

/// Errors raised when validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
   /// A parameter cannot be clamped into a usable value.
   #[error("invalid config: {0}")]
   Invalid(String),

   /// The layered configuration could not be extracted.
   #[error("failed to load config: {0}")]
   Load(#[source] Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
   fn from(e: figment::Error) -> Self {
      Self::Load(Box::new(e))
   }
}

/// Standard result type using [`enum@Error`] as the default error type
pub type Result<T, E = Error> = std::result::Result<T, E>;
