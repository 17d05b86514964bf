//! Connection acceptor and per-connection request handling.
//!
//! Each connection is served strictly one request at a time: a cache miss
//! queues a decode task and the handler waits until a publisher has answered
//! before it reads the next request.

use std::sync::{Arc, atomic::Ordering};

use tokio::{
   net::{TcpListener, tcp::OwnedReadHalf},
   time,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::{
   Shared,
   reader::{DecodeRequest, DecodeTask},
   registry::Connection,
};
use crate::{
   Result,
   cache::cache_key,
   error::SocketError,
   protocol::{Reply, Request, SocketBuffer},
};

/// How a request was dealt with
enum Served {
   Replied,
   Queued,
}

pub(crate) async fn accept_loop(
   shared: Arc<Shared>,
   listener: TcpListener,
   token: CancellationToken,
) {
   let handlers = TaskTracker::new();
   let poll = shared.config.accept_poll();
   match listener.local_addr() {
      Ok(addr) => tracing::info!("acceptor started on {addr}"),
      Err(_) => tracing::info!("acceptor started"),
   }

   while shared.run.acceptor.load(Ordering::Acquire) {
      let (stream, peer) = match time::timeout(poll, listener.accept()).await {
         Err(_) => continue,
         Ok(Ok(accepted)) => accepted,
         Ok(Err(e)) => {
            tracing::error!("acceptor: {}", SocketError::Accept(e));
            time::sleep(poll).await;
            continue;
         },
      };

      let _ = stream.set_nodelay(true);
      let (reader, writer) = stream.into_split();
      let conn = shared.registry.register(peer, Box::new(writer));
      tracing::info!("acceptor: connection from {peer} <{}>", conn.id());

      handlers.spawn(handle_connection(Arc::clone(&shared), conn, reader, token.clone()));
   }

   drop(listener);
   handlers.close();
   handlers.wait().await;
   tracing::info!("acceptor stopped");
}

async fn handle_connection(
   shared: Arc<Shared>,
   conn: Arc<Connection>,
   mut reader: OwnedReadHalf,
   token: CancellationToken,
) {
   let id = conn.id();
   let max_len = shared.config.max_request_bytes;
   let mut buffer = SocketBuffer::new();
   tracing::debug!("concierge<{id}> started");

   loop {
      let received = tokio::select! {
         received = buffer.recv_request(&mut reader, max_len) => received,
         () = token.cancelled() => break,
      };

      let request = match received {
         Ok(Some(request)) => request,
         Ok(None) => break,
         Err(e) => {
            tracing::debug!("concierge<{id}> read error: {e}");
            break;
         },
      };

      match serve(&shared, &conn, request).await {
         Ok(Served::Replied) => {},
         Ok(Served::Queued) => {
            if !await_delivery(&shared, &conn, &token).await {
               break;
            }
         },
         Err(e) => {
            tracing::debug!("concierge<{id}> write error: {e}");
            break;
         },
      }
   }

   shared.registry.remove(id);
   conn.close().await;
   tracing::debug!("concierge<{id}> stopped");
}

async fn serve(shared: &Shared, conn: &Connection, request: Request) -> Result<Served> {
   let timeout = shared.config.send_timeout();
   match request {
      Request::Stats { .. } => {
         let count = shared.cache.size().to_string();
         conn.send(&Reply::Stats(count), timeout).await?;
         Ok(Served::Replied)
      },
      Request::Sweep { path, tarinfo } => {
         let key = cache_key(&path);
         tracing::info!("concierge<{}> Sweep: {key}", conn.id());

         if let Some(payload) = shared.cache.get(&key) {
            tracing::info!("concierge<{}> Cache: {key} ({} B)", conn.id(), payload.len());
            conn.send(&Reply::Sweep(payload), timeout).await?;
            return Ok(Served::Replied);
         }

         conn.set_outstanding(true);
         let task = DecodeTask {
            request:       DecodeRequest { source_path: path, locator: tarinfo },
            connection_id: conn.id(),
            cache_key:     key,
         };
         if shared.tasks_tx.send(task).is_err() {
            conn.set_outstanding(false);
            conn.send(&Reply::Error("decode queue closed".to_string()), timeout).await?;
            return Ok(Served::Replied);
         }
         Ok(Served::Queued)
      },
   }
}

/// Waits for a publisher to clear `outstanding`. Returns `false` when the
/// connection should be closed instead of reading another request.
async fn await_delivery(shared: &Shared, conn: &Connection, token: &CancellationToken) -> bool {
   let poll = shared.config.poll_interval();
   loop {
      if !conn.is_outstanding() {
         return !conn.is_broken();
      }
      if !shared.run.publisher.load(Ordering::Acquire) || token.is_cancelled() {
         return false;
      }
      time::sleep(poll).await;
   }
}
