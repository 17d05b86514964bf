#![cfg(unix)]

mod support;

use std::{
   sync::{Arc, Mutex},
   time::Duration,
};

use support::{CountingDecoder, start_server};
use sweepd::{
   StopStatus,
   server::{ShutdownSignal, SignalHook},
};

#[tokio::test]
async fn test_sigterm_stops_server_and_runs_chained_hook() {
   let (server, _addr) = start_server(2, 4, Arc::new(CountingDecoder::new())).await;
   let seen = Arc::new(Mutex::new(None));
   let hook_seen = Arc::clone(&seen);
   let hook: SignalHook = Box::new(move |signal| {
      *hook_seen.lock().unwrap() = Some(signal);
   });
   let stopper = server.install_signal_handler(Some(hook)).unwrap();

   let status = std::process::Command::new("kill")
      .arg("-TERM")
      .arg(std::process::id().to_string())
      .status()
      .unwrap();
   assert!(status.success());

   let (signal, stopped) = tokio::time::timeout(Duration::from_secs(10), stopper)
      .await
      .expect("handler ran")
      .unwrap();
   assert_eq!(signal, ShutdownSignal::Terminate);
   assert_eq!(stopped, StopStatus::Stopped);
   assert_eq!(*seen.lock().unwrap(), Some(ShutdownSignal::Terminate));
   assert!(!server.is_running());
   assert_eq!(server.running_readers(), 0);
   assert_eq!(server.stop().await, StopStatus::AlreadyStopped);
}
