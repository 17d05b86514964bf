//! Decode-on-demand cache server.
//!
//! Startup brings components up leaves first (readers, then publishers, then
//! the acceptor) so no decode task is queued before a reader can take it.
//! Shutdown stops them in the same order.

mod concierge;
mod publisher;
mod reader;
pub mod registry;
mod signal;

use std::{
   net::SocketAddr,
   sync::{
      Arc,
      atomic::{AtomicBool, AtomicUsize, Ordering},
   },
   thread,
   time::Duration,
};

use flume::{Receiver, Sender};
use parking_lot::Mutex;
use tokio::{net::TcpListener, task::JoinHandle, time};
use tokio_util::sync::CancellationToken;

pub use self::{
   reader::{DecodeRequest, DecodeResult, DecodeTask},
   registry::{Connection, ConnectionId, ConnectionRegistry},
   signal::{ShutdownSignal, SignalHook},
};
use crate::{
   Result,
   cache::SweepCache,
   config::ServerConfig,
   decoder::Decoder,
   error::{Error, SocketError},
};

const STARTUP_POLL: Duration = Duration::from_millis(20);

/// Outcome of [`Server::stop`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopStatus {
   /// The server was running and has now stopped.
   Stopped,
   /// Nothing was running.
   AlreadyStopped,
}

/// Liveness flags observed by every server task.
///
/// `readers` counts live reader threads and doubles as their run flag: they
/// keep polling while it is non-zero.
#[derive(Debug, Default)]
pub(crate) struct RunState {
   pub readers:   AtomicUsize,
   pub publisher: AtomicBool,
   pub acceptor:  AtomicBool,
}

/// State shared between the acceptor, connection handlers and publishers
pub(crate) struct Shared {
   pub config:     ServerConfig,
   pub cache:      Arc<SweepCache>,
   pub registry:   ConnectionRegistry,
   pub run:        Arc<RunState>,
   pub tasks_tx:   Sender<DecodeTask>,
   pub results_rx: Receiver<DecodeResult>,
}

/// Handles of one started generation of server tasks
struct Running {
   readers:    Vec<thread::JoinHandle<()>>,
   publishers: Vec<JoinHandle<()>>,
   acceptor:   JoinHandle<()>,
   token:      CancellationToken,
}

pub struct Server {
   shared:     Arc<Shared>,
   decoder:    Arc<dyn Decoder>,
   tasks_rx:   Receiver<DecodeTask>,
   results_tx: Sender<DecodeResult>,
   running:    tokio::sync::Mutex<Option<Running>>,
   local_addr: Mutex<Option<SocketAddr>>,
}

impl Server {
   /// Creates a server with a fresh cache sized from `config`.
   pub fn new(config: ServerConfig, decoder: Arc<dyn Decoder>) -> Result<Self> {
      config.validate()?;
      let cache = Arc::new(SweepCache::new(config.cache_capacity)?);
      Self::with_cache(config, decoder, cache)
   }

   /// Creates a server around an existing cache.
   pub fn with_cache(
      config: ServerConfig,
      decoder: Arc<dyn Decoder>,
      cache: Arc<SweepCache>,
   ) -> Result<Self> {
      config.validate()?;
      let (tasks_tx, tasks_rx) = flume::unbounded();
      let (results_tx, results_rx) = flume::unbounded();
      let shared = Arc::new(Shared {
         config,
         cache,
         registry: ConnectionRegistry::new(),
         run: Arc::new(RunState::default()),
         tasks_tx,
         results_rx,
      });
      Ok(Self {
         shared,
         decoder,
         tasks_rx,
         results_tx,
         running: tokio::sync::Mutex::new(None),
         local_addr: Mutex::new(None),
      })
   }

   pub fn config(&self) -> &ServerConfig {
      &self.shared.config
   }

   pub fn cache(&self) -> &Arc<SweepCache> {
      &self.shared.cache
   }

   pub fn registry(&self) -> &ConnectionRegistry {
      &self.shared.registry
   }

   /// Address the acceptor is bound to, once started
   pub fn local_addr(&self) -> Option<SocketAddr> {
      *self.local_addr.lock()
   }

   /// Number of reader threads currently live
   pub fn running_readers(&self) -> usize {
      self.shared.run.readers.load(Ordering::Acquire)
   }

   pub fn is_running(&self) -> bool {
      self.shared.run.acceptor.load(Ordering::Acquire)
   }

   /// Starts after the configured delay.
   pub async fn start(&self) -> Result<()> {
      self.start_after(self.shared.config.start_delay()).await
   }

   /// Binds the listener, then starts readers, publishers and the acceptor in
   /// that order. A bind failure aborts startup before anything is spawned.
   pub async fn start_after(&self, delay: Duration) -> Result<()> {
      let mut running = self.running.lock().await;
      if running.is_some() {
         return Err(Error::Server { op: "start", reason: "server already running".to_string() });
      }

      if !delay.is_zero() {
         time::sleep(delay).await;
      }

      let config = &self.shared.config;
      let addr = config.bind_addr();
      let listener = TcpListener::bind(&addr)
         .await
         .map_err(|source| SocketError::Bind { addr: addr.clone(), source })?;
      let bound = listener.local_addr()?;

      let run = &self.shared.run;
      let count = config.effective_readers();
      run.readers.store(0, Ordering::Release);
      let readers = match reader::spawn_readers(
         count,
         run,
         &self.tasks_rx,
         &self.results_tx,
         &self.decoder,
         config.poll_interval(),
      ) {
         Ok(handles) => handles,
         Err(e) => {
            run.readers.store(0, Ordering::Release);
            return Err(e.into());
         },
      };
      while run.readers.load(Ordering::Acquire) < count {
         time::sleep(STARTUP_POLL).await;
      }

      run.publisher.store(true, Ordering::Release);
      let publishers = (0..config.effective_publishers())
         .map(|id| tokio::spawn(publisher::publisher_loop(id, Arc::clone(&self.shared))))
         .collect();

      let token = CancellationToken::new();
      run.acceptor.store(true, Ordering::Release);
      let acceptor =
         tokio::spawn(concierge::accept_loop(Arc::clone(&self.shared), listener, token.clone()));

      *self.local_addr.lock() = Some(bound);
      *running = Some(Running { readers, publishers, acceptor, token });
      tracing::info!("server started on {bound} with {count} readers");
      Ok(())
   }

   /// Stops readers, then publishers, then the acceptor and every connection
   /// handler. Calling it again is a no-op.
   pub async fn stop(&self) -> StopStatus {
      let mut running = self.running.lock().await;
      let Some(Running { readers, publishers, acceptor, token }) = running.take() else {
         return StopStatus::AlreadyStopped;
      };
      let run = &self.shared.run;

      tracing::debug!("stopping readers ...");
      run.readers.store(0, Ordering::Release);
      let joined = tokio::task::spawn_blocking(move || {
         readers
            .into_iter()
            .filter_map(|handle| handle.join().err())
            .count()
      })
      .await;
      match joined {
         Ok(0) => {},
         Ok(panicked) => tracing::warn!("{panicked} reader thread(s) panicked"),
         Err(e) => tracing::warn!("failed to join readers: {e}"),
      }

      tracing::debug!("stopping publishers ...");
      run.publisher.store(false, Ordering::Release);
      for handle in publishers {
         if let Err(e) = handle.await {
            tracing::warn!("publisher task failed: {e}");
         }
      }

      tracing::debug!("stopping acceptor ...");
      run.acceptor.store(false, Ordering::Release);
      token.cancel();
      if let Err(e) = acceptor.await {
         tracing::warn!("acceptor task failed: {e}");
      }

      *self.local_addr.lock() = None;
      tracing::info!("server stopped");
      StopStatus::Stopped
   }
}
