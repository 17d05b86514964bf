mod support;

use std::{collections::HashSet, sync::Arc, time::Duration};

use futures::future::join_all;
use support::{CountingDecoder, connect, start_server};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pool_serves_simultaneous_requests() {
   let decoder = Arc::new(CountingDecoder::with_delay(Duration::from_millis(20)));
   let (server, addr) = start_server(4, 32, decoder.clone()).await;
   let client = connect(addr, 4).await;
   assert_eq!(client.len(), 4);

   let paths: Vec<String> = (0..client.len()).map(|i| format!("/data/pool-{i}.nc")).collect();
   let records = join_all(paths.iter().map(|p| client.get(p, None))).await;

   let mut seen = HashSet::new();
   for (path, record) in paths.iter().zip(records) {
      let record = record.unwrap().unwrap();
      assert_eq!(&record.source, path);
      assert!(seen.insert(record.source));
   }
   assert_eq!(decoder.calls(), 4);

   client.close().await;
   server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pool_queues_requests_beyond_its_size() {
   let decoder = Arc::new(CountingDecoder::with_delay(Duration::from_millis(10)));
   let (server, addr) = start_server(2, 32, decoder).await;
   let client = connect(addr, 3).await;

   let paths: Vec<String> = (0..client.len() + 1)
      .map(|i| format!("/data/extra-{i}.nc"))
      .collect();
   let records = tokio::time::timeout(
      Duration::from_secs(10),
      join_all(paths.iter().map(|p| client.get(p, None))),
   )
   .await
   .expect("all requests answered");

   for (path, record) in paths.iter().zip(records) {
      assert_eq!(&record.unwrap().unwrap().source, path);
   }

   client.close().await;
   server.stop().await;
}

#[tokio::test]
async fn test_pool_size_is_clamped() {
   let (server, addr) = start_server(2, 4, Arc::new(CountingDecoder::new())).await;
   let client = connect(addr, 64).await;
   assert_eq!(client.len(), 16);
   client.close().await;
   server.stop().await;
}

#[tokio::test]
async fn test_pool_reconnects_after_server_restart() {
   let (server, addr) = start_server(2, 4, Arc::new(CountingDecoder::new())).await;
   let client = connect(addr, 1).await;
   assert!(client.stats().await.unwrap().is_some());

   server.stop().await;
   assert!(client.stats().await.unwrap().is_none());

   let mut config = support::server_config(2, 4);
   config.port = addr.port();
   let restarted =
      sweepd::Server::new(config, Arc::new(CountingDecoder::new())).expect("server");
   restarted.start().await.expect("restart on same port");

   assert_eq!(client.stats().await.unwrap().as_deref(), Some("0"));

   client.close().await;
   restarted.stop().await;
}

#[tokio::test]
async fn test_pool_reports_unreachable_server() {
   let addr = {
      let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
      probe.local_addr().unwrap()
   };
   let result = sweepd::Client::connect(sweepd::config::ClientConfig {
      host: addr.ip().to_string(),
      port: addr.port(),
      ..Default::default()
   })
   .await;
   assert!(result.is_err());
}
