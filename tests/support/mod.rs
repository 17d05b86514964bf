#![allow(dead_code, reason = "each test binary uses a different subset of the fixtures")]

use std::{
   net::SocketAddr,
   sync::{
      Arc,
      atomic::{AtomicUsize, Ordering},
   },
   time::Duration,
};

use sweepd::{
   Client, Server,
   config::{ClientConfig, ServerConfig},
   decoder::{ArchiveLocator, DecodeError, Decoder, SweepRecord},
};

/// Decoder fixture that counts calls and fails for paths containing "broken".
#[derive(Default)]
pub struct CountingDecoder {
   calls: AtomicUsize,
   delay: Duration,
}

impl CountingDecoder {
   pub fn new() -> Self {
      Self::default()
   }

   pub fn with_delay(delay: Duration) -> Self {
      Self { calls: AtomicUsize::new(0), delay }
   }

   pub fn calls(&self) -> usize {
      self.calls.load(Ordering::SeqCst)
   }
}

impl Decoder for CountingDecoder {
   fn decode(
      &self,
      source: &str,
      _locator: Option<&ArchiveLocator>,
   ) -> Result<SweepRecord, DecodeError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      if !self.delay.is_zero() {
         std::thread::sleep(self.delay);
      }
      if source.contains("broken") {
         return Err(DecodeError::Other(format!("cannot decode {source}")));
      }
      if source.contains("panic") {
         panic!("decoder crashed on {source}");
      }
      Ok(SweepRecord::new(source).with_product("Z", source.as_bytes().to_vec()))
   }
}

pub fn server_config(readers: usize, cache_capacity: usize) -> ServerConfig {
   ServerConfig {
      host: "127.0.0.1".to_string(),
      port: 0,
      readers,
      cache_capacity,
      start_delay_ms: 0,
      poll_interval_ms: 10,
      accept_poll_ms: 20,
      ..ServerConfig::default()
   }
}

pub async fn start_server(
   readers: usize,
   cache_capacity: usize,
   decoder: Arc<dyn Decoder>,
) -> (Arc<Server>, SocketAddr) {
   let server =
      Arc::new(Server::new(server_config(readers, cache_capacity), decoder).expect("server"));
   server.start().await.expect("start");
   let addr = server.local_addr().expect("bound address");
   (server, addr)
}

pub async fn connect(addr: SocketAddr, connections: usize) -> Client {
   Client::connect(ClientConfig {
      host: addr.ip().to_string(),
      port: addr.port(),
      connections,
      ..ClientConfig::default()
   })
   .await
   .expect("client connect")
}
