//! SIGINT/SIGTERM-triggered shutdown.

use std::{fmt, io, sync::Arc};

use tokio::task::JoinHandle;

use super::{Server, StopStatus};

/// Signal that ended the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
   Interrupt,
   Terminate,
}

impl fmt::Display for ShutdownSignal {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      match self {
         Self::Interrupt => f.write_str("SIGINT"),
         Self::Terminate => f.write_str("SIGTERM"),
      }
   }
}

/// Cleanup chained after the server has stopped, so an embedding process keeps
/// its own signal handling.
pub type SignalHook = Box<dyn FnOnce(ShutdownSignal) + Send>;

#[cfg(unix)]
struct Listeners {
   interrupt: tokio::signal::unix::Signal,
   terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Listeners {
   fn register() -> io::Result<Self> {
      use tokio::signal::unix::{SignalKind, signal};
      Ok(Self {
         interrupt: signal(SignalKind::interrupt())?,
         terminate: signal(SignalKind::terminate())?,
      })
   }

   async fn next(&mut self) -> ShutdownSignal {
      tokio::select! {
         _ = self.interrupt.recv() => ShutdownSignal::Interrupt,
         _ = self.terminate.recv() => ShutdownSignal::Terminate,
      }
   }
}

#[cfg(not(unix))]
struct Listeners;

#[cfg(not(unix))]
impl Listeners {
   fn register() -> io::Result<Self> {
      Ok(Self)
   }

   async fn next(&mut self) -> ShutdownSignal {
      if let Err(e) = tokio::signal::ctrl_c().await {
         tracing::warn!("failed to listen for ctrl-c: {e}");
         std::future::pending::<()>().await;
      }
      ShutdownSignal::Interrupt
   }
}

impl Server {
   /// Registers SIGINT/SIGTERM listeners and spawns a task that stops the
   /// server on the first one, then runs `chain`.
   ///
   /// Listeners are registered before this returns, so a signal delivered
   /// afterwards is never missed.
   pub fn install_signal_handler(
      self: &Arc<Self>,
      chain: Option<SignalHook>,
   ) -> io::Result<JoinHandle<(ShutdownSignal, StopStatus)>> {
      let mut listeners = Listeners::register()?;
      let server = Arc::clone(self);
      Ok(tokio::spawn(async move {
         let signal = listeners.next().await;
         tracing::info!("{signal} received");
         let status = server.stop().await;
         if let Some(chain) = chain {
            chain(signal);
         }
         (signal, status)
      }))
   }
}
