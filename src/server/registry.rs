//! Live client connections, keyed by an id allocated at accept time.

use std::{
   collections::HashMap,
   io,
   net::SocketAddr,
   pin::Pin,
   sync::{
      Arc,
      atomic::{AtomicBool, AtomicU64, Ordering},
   },
   task::{Context, Poll},
   time::Duration,
};

use parking_lot::Mutex;
use tokio::{
   io::{AsyncWrite, AsyncWriteExt},
   time::{self, Sleep},
};

use crate::{
   Result,
   error::{Error, ProtocolError, SocketError},
   protocol::{self, Reply},
};

/// Stable identifier of one accepted socket. Never reused within a process.
pub type ConnectionId = u64;

/// Write side of a client socket
pub type ConnectionWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// One registered client connection.
///
/// The write half is shared between the connection's handler (cache hits and
/// stats) and the publishers (decoded sweeps); `outstanding` guarantees they
/// never write at the same time for the same request.
pub struct Connection {
   id:          ConnectionId,
   peer:        SocketAddr,
   writer:      tokio::sync::Mutex<ConnectionWriter>,
   outstanding: AtomicBool,
   broken:      AtomicBool,
}

impl Connection {
   pub const fn id(&self) -> ConnectionId {
      self.id
   }

   pub const fn peer(&self) -> SocketAddr {
      self.peer
   }

   pub fn is_outstanding(&self) -> bool {
      self.outstanding.load(Ordering::Acquire)
   }

   pub fn set_outstanding(&self, value: bool) {
      self.outstanding.store(value, Ordering::Release);
   }

   /// True once a reply could not be written completely; the stream can no
   /// longer be trusted to be frame-aligned.
   pub fn is_broken(&self) -> bool {
      self.broken.load(Ordering::Acquire)
   }

   pub fn mark_broken(&self) {
      self.broken.store(true, Ordering::Release);
   }

   /// Sends one reply, giving up once the peer accepts no bytes for `timeout`.
   ///
   /// A peer that keeps reading gets the whole frame however long it takes.
   pub async fn send(&self, reply: &Reply, timeout: Duration) -> Result<()> {
      let mut writer = self.writer.lock().await;
      let mut guarded = StallGuard::new(&mut **writer, timeout);
      protocol::send_reply(&mut guarded, reply)
         .await
         .map_err(|e| match e {
            Error::Protocol(ProtocolError::Write(source))
               if source.kind() == io::ErrorKind::TimedOut =>
            {
               SocketError::Timeout(timeout.as_millis() as u64).into()
            },
            other => other,
         })
   }

   /// Shuts down the write half so the peer sees end-of-stream.
   pub async fn close(&self) {
      let mut writer = self.writer.lock().await;
      let _ = writer.shutdown().await;
   }
}

/// Writer that fails a write, flush or shutdown which makes no progress for
/// `timeout`. Every accepted byte restarts the clock.
struct StallGuard<'a, W: ?Sized> {
   inner:   &'a mut W,
   timeout: Duration,
   stall:   Option<Pin<Box<Sleep>>>,
}

impl<'a, W: AsyncWrite + Unpin + ?Sized> StallGuard<'a, W> {
   fn new(inner: &'a mut W, timeout: Duration) -> Self {
      Self { inner, timeout, stall: None }
   }

   fn guard<T>(&mut self, cx: &mut Context<'_>, polled: Poll<io::Result<T>>) -> Poll<io::Result<T>> {
      if polled.is_ready() {
         self.stall = None;
         return polled;
      }
      let timeout = self.timeout;
      let stall = self.stall.get_or_insert_with(|| Box::pin(time::sleep(timeout)));
      match stall.as_mut().poll(cx) {
         Poll::Ready(()) => {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::TimedOut, "peer stopped reading")))
         },
         Poll::Pending => Poll::Pending,
      }
   }
}

impl<W: AsyncWrite + Unpin + ?Sized> AsyncWrite for StallGuard<'_, W> {
   fn poll_write(
      mut self: Pin<&mut Self>,
      cx: &mut Context<'_>,
      buf: &[u8],
   ) -> Poll<io::Result<usize>> {
      let polled = Pin::new(&mut *self.inner).poll_write(cx, buf);
      self.guard(cx, polled)
   }

   fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
      let polled = Pin::new(&mut *self.inner).poll_flush(cx);
      self.guard(cx, polled)
   }

   fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
      let polled = Pin::new(&mut *self.inner).poll_shutdown(cx);
      self.guard(cx, polled)
   }
}

impl std::fmt::Debug for Connection {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_struct("Connection")
         .field("id", &self.id)
         .field("peer", &self.peer)
         .field("outstanding", &self.is_outstanding())
         .field("broken", &self.is_broken())
         .finish()
   }
}

/// Map of live connections guarded by one lock
#[derive(Debug)]
pub struct ConnectionRegistry {
   next_id:     AtomicU64,
   connections: Mutex<HashMap<ConnectionId, Arc<Connection>>>,
}

impl Default for ConnectionRegistry {
   fn default() -> Self {
      Self::new()
   }
}

impl ConnectionRegistry {
   pub fn new() -> Self {
      Self { next_id: AtomicU64::new(1), connections: Mutex::new(HashMap::new()) }
   }

   /// Allocates a fresh id and registers the connection with no outstanding
   /// request.
   pub fn register(&self, peer: SocketAddr, writer: ConnectionWriter) -> Arc<Connection> {
      let id = self.next_id.fetch_add(1, Ordering::Relaxed);
      let connection = Arc::new(Connection {
         id,
         peer,
         writer: tokio::sync::Mutex::new(writer),
         outstanding: AtomicBool::new(false),
         broken: AtomicBool::new(false),
      });
      self.connections.lock().insert(id, Arc::clone(&connection));
      connection
   }

   pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
      self.connections.lock().get(&id).cloned()
   }

   pub fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
      self.connections.lock().remove(&id)
   }

   pub fn len(&self) -> usize {
      self.connections.lock().len()
   }

   pub fn is_empty(&self) -> bool {
      self.connections.lock().is_empty()
   }
}
