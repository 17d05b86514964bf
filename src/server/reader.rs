//! Decode workers.
//!
//! Readers are dedicated OS threads so decoding never runs on the async
//! scheduler that serves connections. A panicking decoder is caught per task
//! and reported like any other decode failure.

use std::{
   io,
   panic::{self, AssertUnwindSafe},
   sync::{Arc, atomic::Ordering},
   thread::{self, JoinHandle},
   time::Duration,
};

use bytes::Bytes;
use flume::{Receiver, RecvTimeoutError, Sender};

use super::{RunState, registry::ConnectionId};
use crate::decoder::{ArchiveLocator, DecodeError, Decoder};

/// What to decode
#[derive(Debug, Clone)]
pub struct DecodeRequest {
   pub source_path: String,
   pub locator:     Option<ArchiveLocator>,
}

/// A decode request plus where to deliver the result
#[derive(Debug, Clone)]
pub struct DecodeTask {
   pub request:       DecodeRequest,
   pub connection_id: ConnectionId,
   pub cache_key:     String,
}

/// Serialized sweep or the reason decoding failed
#[derive(Debug, Clone)]
pub struct DecodeResult {
   pub connection_id: ConnectionId,
   pub cache_key:     String,
   pub source_path:   String,
   pub outcome:       Result<Bytes, DecodeError>,
}

/// Spawns `count` reader threads. Each bumps `run.readers` once when it is live.
pub(crate) fn spawn_readers(
   count: usize,
   run: &Arc<RunState>,
   tasks: &Receiver<DecodeTask>,
   results: &Sender<DecodeResult>,
   decoder: &Arc<dyn Decoder>,
   poll: Duration,
) -> io::Result<Vec<JoinHandle<()>>> {
   (0..count)
      .map(|id| {
         let run = Arc::clone(run);
         let tasks = tasks.clone();
         let results = results.clone();
         let decoder = Arc::clone(decoder);
         thread::Builder::new()
            .name(format!("sweepd-reader-{id:02}"))
            .spawn(move || reader_loop(id, &run, &tasks, &results, decoder.as_ref(), poll))
      })
      .collect()
}

fn reader_loop(
   id: usize,
   run: &RunState,
   tasks: &Receiver<DecodeTask>,
   results: &Sender<DecodeResult>,
   decoder: &dyn Decoder,
   poll: Duration,
) {
   run.readers.fetch_add(1, Ordering::AcqRel);
   tracing::info!("reader[{id:02}] started");

   while run.readers.load(Ordering::Acquire) > 0 {
      let task = match tasks.recv_timeout(poll) {
         Ok(task) => task,
         Err(RecvTimeoutError::Timeout) => continue,
         Err(RecvTimeoutError::Disconnected) => break,
      };
      let result = decode_task(id, decoder, task);
      if results.send(result).is_err() {
         break;
      }
   }

   tracing::info!("reader[{id:02}] stopped");
}

/// Runs the decoder for one task; never panics.
pub(crate) fn decode_task(id: usize, decoder: &dyn Decoder, task: DecodeTask) -> DecodeResult {
   let DecodeTask { request, connection_id, cache_key } = task;
   let source = request.source_path.as_str();

   let decoded = panic::catch_unwind(AssertUnwindSafe(|| {
      decoder.decode(source, request.locator.as_ref())
   }))
   .unwrap_or_else(|_| Err(DecodeError::Panicked(source.to_string())));

   let outcome = decoded.and_then(|record| {
      record
         .to_payload()
         .map_err(|e| DecodeError::Other(format!("failed to serialize {source}: {e}")))
   });

   if let Err(e) = &outcome {
      tracing::warn!("reader[{id:02}] {cache_key}: {e} <{connection_id}>");
   }

   DecodeResult { connection_id, cache_key, source_path: request.source_path, outcome }
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::decoder::SweepRecord;

   struct Panicky;

   impl Decoder for Panicky {
      fn decode(
         &self,
         _source: &str,
         _locator: Option<&ArchiveLocator>,
      ) -> Result<SweepRecord, DecodeError> {
         panic!("corrupt header");
      }
   }

   struct Echo;

   impl Decoder for Echo {
      fn decode(
         &self,
         source: &str,
         _locator: Option<&ArchiveLocator>,
      ) -> Result<SweepRecord, DecodeError> {
         Ok(SweepRecord::new(source).with_product("Z", vec![1, 2, 3]))
      }
   }

   fn task(path: &str) -> DecodeTask {
      DecodeTask {
         request:       DecodeRequest { source_path: path.to_string(), locator: None },
         connection_id: 7,
         cache_key:     crate::cache::cache_key(path),
      }
   }

   #[test]
   fn panics_become_decode_errors() {
      let result = decode_task(0, &Panicky, task("/data/bad.nc"));
      assert_eq!(result.connection_id, 7);
      assert_eq!(result.outcome.unwrap_err(), DecodeError::Panicked("/data/bad.nc".to_string()));
   }

   #[test]
   fn success_carries_serialized_record() {
      let result = decode_task(0, &Echo, task("/data/good.nc"));
      assert_eq!(result.cache_key, "good.nc");
      let record = SweepRecord::from_payload(&result.outcome.unwrap()).unwrap();
      assert_eq!(record.products["Z"], vec![1, 2, 3]);
   }
}
