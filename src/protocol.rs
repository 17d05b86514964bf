//! Wire protocol shared by the server and the client pool.
//!
//! Every message is a 4-byte big-endian length followed by exactly that many
//! bytes. Requests are small JSON control records; replies carry one kind byte
//! followed by the sweep payload, a decimal stats string or an error reason.

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{Result, decoder::ArchiveLocator, error::ProtocolError};

pub const LENGTH_PREFIX_BYTES: usize = 4;

/// Client request messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Request {
   Sweep {
      path:    String,
      #[serde(default)]
      tarinfo: Option<ArchiveLocator>,
   },
   Stats {
      stats: u8,
   },
}

impl Request {
   pub fn sweep(path: impl Into<String>, tarinfo: Option<ArchiveLocator>) -> Self {
      Self::Sweep { path: path.into(), tarinfo }
   }

   pub const fn stats() -> Self {
      Self::Stats { stats: 1 }
   }

   pub fn parse(body: &[u8]) -> Result<Self> {
      serde_json::from_slice(body).map_err(|e| ProtocolError::Malformed(e).into())
   }
}

/// Kind byte leading every server reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReplyKind {
   Sweep = 0x00,
   Stats = 0x01,
   Error = 0x02,
}

impl ReplyKind {
   pub const fn from_byte(value: u8) -> Result<Self, ProtocolError> {
      match value {
         0x00 => Ok(Self::Sweep),
         0x01 => Ok(Self::Stats),
         0x02 => Ok(Self::Error),
         other => Err(ProtocolError::UnknownReplyKind(other)),
      }
   }
}

/// Server response messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
   Sweep(Bytes),
   Stats(String),
   Error(String),
}

impl Reply {
   pub const fn kind(&self) -> ReplyKind {
      match self {
         Self::Sweep(_) => ReplyKind::Sweep,
         Self::Stats(_) => ReplyKind::Stats,
         Self::Error(_) => ReplyKind::Error,
      }
   }

   fn body(&self) -> &[u8] {
      match self {
         Self::Sweep(payload) => payload.as_ref(),
         Self::Stats(count) => count.as_bytes(),
         Self::Error(reason) => reason.as_bytes(),
      }
   }

   pub fn parse(mut frame: Bytes) -> Result<Self> {
      let Some(&first) = frame.first() else {
         return Err(ProtocolError::Empty.into());
      };
      let kind = ReplyKind::from_byte(first)?;
      let body = frame.split_off(1);
      Ok(match kind {
         ReplyKind::Sweep => Self::Sweep(body),
         ReplyKind::Stats => Self::Stats(String::from_utf8_lossy(&body).into_owned()),
         ReplyKind::Error => Self::Error(String::from_utf8_lossy(&body).into_owned()),
      })
   }
}

/// Writes one frame whose body is the concatenation of `parts`.
pub async fn send<W>(writer: &mut W, parts: &[&[u8]]) -> Result<()>
where
   W: AsyncWrite + Unpin,
{
   let len: usize = parts.iter().map(|p| p.len()).sum();
   let len = u32::try_from(len).map_err(|_| ProtocolError::MessageTooLarge(len))?;
   writer
      .write_all(&len.to_be_bytes())
      .await
      .map_err(ProtocolError::Write)?;
   for part in parts {
      writer.write_all(part).await.map_err(ProtocolError::Write)?;
   }
   writer.flush().await.map_err(ProtocolError::Write)?;
   Ok(())
}

/// Reads one frame.
///
/// Returns `Ok(None)` when the peer closed the connection cleanly before a new
/// frame started; a close in the middle of a frame is a protocol error.
pub async fn recv<R>(reader: &mut R, max_len: usize) -> Result<Option<Bytes>>
where
   R: AsyncRead + Unpin,
{
   let mut len_buf = [0u8; LENGTH_PREFIX_BYTES];
   let got = read_full(reader, &mut len_buf).await?;
   if got == 0 {
      return Ok(None);
   }
   if got < LENGTH_PREFIX_BYTES {
      return Err(ProtocolError::Truncated { expected: LENGTH_PREFIX_BYTES, got }.into());
   }

   let len = u32::from_be_bytes(len_buf) as usize;
   if len > max_len {
      return Err(ProtocolError::MessageTooLarge(len).into());
   }

   let mut body = BytesMut::zeroed(len);
   let got = read_full(reader, &mut body).await?;
   if got < len {
      return Err(ProtocolError::Truncated { expected: len, got }.into());
   }
   Ok(Some(body.freeze()))
}

async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> Result<usize>
where
   R: AsyncRead + Unpin,
{
   let mut filled = 0;
   while filled < buf.len() {
      let n = reader
         .read(&mut buf[filled..])
         .await
         .map_err(ProtocolError::Read)?;
      if n == 0 {
         break;
      }
      filled += n;
   }
   Ok(filled)
}

pub async fn send_reply<W>(writer: &mut W, reply: &Reply) -> Result<()>
where
   W: AsyncWrite + Unpin,
{
   let kind = [reply.kind() as u8];
   send(writer, &[kind.as_slice(), reply.body()]).await
}

pub async fn recv_reply<R>(reader: &mut R, max_len: usize) -> Result<Option<Reply>>
where
   R: AsyncRead + Unpin,
{
   match recv(reader, max_len).await? {
      Some(frame) => Reply::parse(frame).map(Some),
      None => Ok(None),
   }
}

/// Stack-allocated buffer for control records
pub struct SocketBuffer {
   buf: SmallVec<[u8; 512]>,
}

impl Default for SocketBuffer {
   fn default() -> Self {
      Self::new()
   }
}

impl SocketBuffer {
   pub fn new() -> Self {
      Self { buf: SmallVec::new() }
   }

   /// Encodes `request` as JSON and sends it as one frame
   pub async fn send_request<W>(&mut self, writer: &mut W, request: &Request) -> Result<()>
   where
      W: AsyncWrite + Unpin,
   {
      self.buf.clear();
      serde_json::to_writer(&mut self.buf, request)?;
      send(writer, &[self.buf.as_slice()]).await
   }

   /// Receives the next control record, `Ok(None)` on orderly close
   pub async fn recv_request<R>(&mut self, reader: &mut R, max_len: usize) -> Result<Option<Request>>
   where
      R: AsyncRead + Unpin,
   {
      match recv(reader, max_len).await? {
         Some(body) => Request::parse(&body).map(Some),
         None => Ok(None),
      }
   }
}
