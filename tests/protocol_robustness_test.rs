use bytes::Bytes;
use sweepd::protocol::{self, Reply, Request, SocketBuffer};
use tokio::io::AsyncWriteExt;

#[tokio::test]
async fn test_protocol_rejects_truncated_length_prefix() {
   let (mut client, mut server) = tokio::io::duplex(16);
   client.write_all(&[0x00, 0x02]).await.unwrap();
   drop(client);

   let mut buffer = SocketBuffer::new();
   let err = buffer.recv_request(&mut server, 1024).await.unwrap_err();
   assert!(err.to_string().contains("connection closed mid-frame"));
}

#[tokio::test]
async fn test_protocol_rejects_truncated_payload() {
   let (mut client, mut server) = tokio::io::duplex(32);
   let len: u32 = 10;
   client.write_all(&len.to_be_bytes()).await.unwrap();
   client.write_all(&[0xaa; 5]).await.unwrap();
   drop(client);

   let mut buffer = SocketBuffer::new();
   let err = buffer.recv_request(&mut server, 1024).await.unwrap_err();
   assert!(err.to_string().contains("expected 10 bytes, got 5"));
}

#[tokio::test]
async fn test_protocol_rejects_garbage_payload() {
   let (mut client, mut server) = tokio::io::duplex(64);
   let payload = [0xffu8; 16];
   let len = payload.len() as u32;
   client.write_all(&len.to_be_bytes()).await.unwrap();
   client.write_all(&payload).await.unwrap();
   drop(client);

   let mut buffer = SocketBuffer::new();
   let err = buffer.recv_request(&mut server, 1024).await.unwrap_err();
   assert!(err.to_string().contains("malformed request"));
}

#[tokio::test]
async fn test_protocol_rejects_unknown_record_shape() {
   let (mut client, mut server) = tokio::io::duplex(64);
   protocol::send(&mut client, &[br#"{"file":"a.nc"}"#.as_slice()])
      .await
      .unwrap();
   drop(client);

   let mut buffer = SocketBuffer::new();
   let err = buffer.recv_request(&mut server, 1024).await.unwrap_err();
   assert!(err.to_string().contains("malformed request"));
}

#[tokio::test]
async fn test_protocol_rejects_oversized_payload() {
   let (mut client, mut server) = tokio::io::duplex(32);
   let len: u32 = 2048;
   client.write_all(&len.to_be_bytes()).await.unwrap();
   drop(client);

   let mut buffer = SocketBuffer::new();
   let err = buffer.recv_request(&mut server, 16).await.unwrap_err();
   assert!(err.to_string().contains("message too large"));
}

#[tokio::test]
async fn test_protocol_reports_clean_close_as_none() {
   let (client, mut server) = tokio::io::duplex(16);
   drop(client);

   let mut buffer = SocketBuffer::new();
   let got = buffer.recv_request(&mut server, 1024).await.unwrap();
   assert!(got.is_none());
}

#[tokio::test]
async fn test_protocol_carries_several_requests_on_one_stream() {
   let (mut client, mut server) = tokio::io::duplex(1024);
   let mut out = SocketBuffer::new();
   out.send_request(&mut client, &Request::sweep("/data/a.nc", None))
      .await
      .unwrap();
   out.send_request(&mut client, &Request::stats()).await.unwrap();
   drop(client);

   let mut inbound = SocketBuffer::new();
   let first = inbound.recv_request(&mut server, 1024).await.unwrap();
   let second = inbound.recv_request(&mut server, 1024).await.unwrap();
   let third = inbound.recv_request(&mut server, 1024).await.unwrap();
   assert_eq!(first, Some(Request::sweep("/data/a.nc", None)));
   assert_eq!(second, Some(Request::stats()));
   assert!(third.is_none());
}

#[tokio::test]
async fn test_protocol_reply_frames_start_with_kind_byte() {
   let (mut client, mut server) = tokio::io::duplex(64);
   protocol::send_reply(&mut client, &Reply::Stats("42".to_string()))
      .await
      .unwrap();
   drop(client);

   let frame = protocol::recv(&mut server, 64).await.unwrap().unwrap();
   assert_eq!(frame, Bytes::from_static(&[0x01, b'4', b'2']));
}

#[tokio::test]
async fn test_protocol_rejects_empty_reply_frame() {
   let (mut client, mut server) = tokio::io::duplex(16);
   protocol::send(&mut client, &[]).await.unwrap();
   drop(client);

   let err = protocol::recv_reply(&mut server, 64).await.unwrap_err();
   assert!(err.to_string().contains("empty reply frame"));
}
