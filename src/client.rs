//! Client connection pool.
//!
//! Keeps a fixed number of persistent connections and spreads requests across
//! them round-robin. Each connection carries at most one request at a time, so
//! up to `connections` requests can be in flight at once.

use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use tokio::{io::AsyncWriteExt, net::TcpStream, sync::Mutex};

use crate::{
   Result,
   config::ClientConfig,
   decoder::{ArchiveLocator, SweepRecord},
   error::{Error, SocketError},
   protocol::{self, Reply, Request, SocketBuffer},
};

struct Slot {
   stream: Option<TcpStream>,
   buffer: SocketBuffer,
}

pub struct Client {
   config: ClientConfig,
   slots:  Vec<Mutex<Slot>>,
   next:   AtomicUsize,
}

async fn open(addr: &str) -> Result<TcpStream> {
   let stream = TcpStream::connect(addr)
      .await
      .map_err(|source| SocketError::Connect { addr: addr.to_string(), source })?;
   let _ = stream.set_nodelay(true);
   Ok(stream)
}

impl Client {
   /// Opens every pooled connection up front; any failure aborts.
   pub async fn connect(config: ClientConfig) -> Result<Self> {
      config.validate()?;
      let addr = config.server_addr();
      let count = config.effective_connections();
      let mut slots = Vec::with_capacity(count);
      for _ in 0..count {
         let stream = open(&addr).await?;
         slots.push(Mutex::new(Slot { stream: Some(stream), buffer: SocketBuffer::new() }));
      }
      tracing::debug!("client connected to {addr} with {count} connection(s)");
      Ok(Self { config, slots, next: AtomicUsize::new(0) })
   }

   /// Number of pooled connections
   pub fn len(&self) -> usize {
      self.slots.len()
   }

   pub fn is_empty(&self) -> bool {
      self.slots.is_empty()
   }

   fn next_index(&self) -> usize {
      self.next.fetch_add(1, Ordering::Relaxed) % self.slots.len()
   }

   /// Sends one request on the next connection and waits for its reply.
   ///
   /// Transport failures are logged and reported as `Ok(None)`; the affected
   /// connection is reopened on its next use.
   async fn round_trip(&self, request: &Request, op: &'static str) -> Result<Option<Reply>> {
      let index = self.next_index();
      let mut slot = self.slots[index].lock().await;
      let Slot { stream, buffer } = &mut *slot;

      if stream.is_none() {
         match open(&self.config.server_addr()).await {
            Ok(fresh) => *stream = Some(fresh),
            Err(e) => {
               tracing::error!("client.{op}[{index}] reconnect failed: {e}");
               return Ok(None);
            },
         }
      }
      let Some(conn) = stream.as_mut() else {
         return Ok(None);
      };

      if let Err(e) = buffer.send_request(conn, request).await {
         tracing::error!("client.{op}[{index}] send failed: {e}");
         *stream = None;
         return Ok(None);
      }

      match protocol::recv_reply(conn, self.config.max_frame_bytes).await {
         Ok(Some(reply)) => Ok(Some(reply)),
         Ok(None) => {
            tracing::error!("client.{op}[{index}] no data");
            *stream = None;
            Ok(None)
         },
         Err(e) => {
            tracing::error!("client.{op}[{index}] no data: {e}");
            *stream = None;
            Ok(None)
         },
      }
   }

   /// Fetches the serialized sweep for `path` exactly as the server cached it.
   pub async fn get_raw(
      &self,
      path: &str,
      tarinfo: Option<ArchiveLocator>,
   ) -> Result<Option<Bytes>> {
      match self.round_trip(&Request::sweep(path, tarinfo), "get").await? {
         None => Ok(None),
         Some(Reply::Sweep(payload)) => Ok(Some(payload)),
         Some(Reply::Error(reason)) => Err(Error::Remote { reason }),
         Some(Reply::Stats(_)) => Err(Error::UnexpectedReply("get")),
      }
   }

   /// Fetches and deserializes the sweep for `path`.
   pub async fn get(
      &self,
      path: &str,
      tarinfo: Option<ArchiveLocator>,
   ) -> Result<Option<SweepRecord>> {
      match self.get_raw(path, tarinfo).await? {
         Some(payload) => SweepRecord::from_payload(&payload).map(Some),
         None => Ok(None),
      }
   }

   /// Number of entries in the server cache, as the decimal string it sent.
   pub async fn stats(&self) -> Result<Option<String>> {
      match self.round_trip(&Request::stats(), "stats").await? {
         None => Ok(None),
         Some(Reply::Stats(count)) => Ok(Some(count)),
         Some(Reply::Error(reason)) => Err(Error::Remote { reason }),
         Some(Reply::Sweep(_)) => Err(Error::UnexpectedReply("stats")),
      }
   }

   /// Closes every pooled connection.
   pub async fn close(&self) {
      for slot in &self.slots {
         let mut slot = slot.lock().await;
         if let Some(mut stream) = slot.stream.take() {
            let _ = stream.shutdown().await;
         }
      }
   }
}
