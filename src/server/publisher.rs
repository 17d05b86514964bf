//! Routes decode results back to the connection that asked for them.

use std::sync::{Arc, atomic::Ordering};

use tokio::time;

use super::{Shared, reader::DecodeResult};
use crate::protocol::Reply;

pub(crate) async fn publisher_loop(id: usize, shared: Arc<Shared>) {
   tracing::info!("publisher[{id:02}] started");
   let poll = shared.config.poll_interval();

   while shared.run.publisher.load(Ordering::Acquire) {
      let result = match time::timeout(poll, shared.results_rx.recv_async()).await {
         Ok(Ok(result)) => result,
         Ok(Err(_)) => break,
         Err(_) => continue,
      };
      deliver(id, &shared, result).await;
   }

   tracing::info!("publisher[{id:02}] stopped");
}

/// Caches a successful payload and answers the waiting connection; failures
/// are answered with an explicit error reply.
async fn deliver(id: usize, shared: &Shared, result: DecodeResult) {
   let DecodeResult { connection_id, cache_key, source_path, outcome } = result;

   let Some(conn) = shared.registry.get(connection_id) else {
      tracing::warn!("publisher[{id:02}] client <{connection_id}> not found, dropping {cache_key}");
      return;
   };

   let reply = match outcome {
      Ok(payload) => {
         shared.cache.put(cache_key.clone(), payload.clone());
         Reply::Sweep(payload)
      },
      Err(e) => Reply::Error(format!("{source_path}: {e}")),
   };

   match conn.send(&reply, shared.config.send_timeout()).await {
      Ok(()) => match &reply {
         Reply::Sweep(payload) => tracing::info!(
            "publisher[{id:02}] Drive: {cache_key} ({} B) <{connection_id}>",
            payload.len()
         ),
         _ => tracing::info!("publisher[{id:02}] Error: {cache_key} <{connection_id}>"),
      },
      Err(e) => {
         tracing::warn!("publisher[{id:02}] failed to deliver {cache_key} <{connection_id}>: {e}");
         conn.mark_broken();
      },
   }

   conn.set_outstanding(false);
}
