//! Loopback end-to-end coverage for the scenarios and invariants this
//! server is contracted against: E1-E7 and the block-number wrap (P5).

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use tftpd::config::ServerConfig;
use tftpd::dispatcher::Dispatcher;
use tftpd::tftp::packet::{Packet, Request};
use tftpd::tftp::ErrorCode;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Starts a server bound to an OS-assigned loopback port and returns its
/// address plus a token that tears it down when cancelled.
async fn start_server(root: std::path::PathBuf) -> (SocketAddr, CancellationToken) {
	let config = ServerConfig::new(IpAddr::V4(Ipv4Addr::LOCALHOST), root).with_listening_port(0);
	let dispatcher = Dispatcher::bind(config).await.unwrap();
	let addr = dispatcher.local_addr().unwrap();
	let cancel = CancellationToken::new();
	let task_cancel = cancel.clone();
	tokio::spawn(async move { dispatcher.run(task_cancel).await });
	(addr, cancel)
}

async fn recv_packet(sock: &UdpSocket) -> (Packet, SocketAddr) {
	let mut buf = vec![0u8; 65535 + 64];
	let (n, from) = tokio::time::timeout(RECV_TIMEOUT, sock.recv_from(&mut buf)).await.unwrap().unwrap();
	(Packet::decode(&buf[..n]).unwrap(), from)
}

fn rrq(filename: &str, options: &[(&str, &str)]) -> Packet {
	Packet::Rrq(Request {
		filename: filename.to_string(),
		mode: "octet".to_string(),
		options: options.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
	})
}

fn wrq(filename: &str) -> Packet {
	Packet::Wrq(Request { filename: filename.to_string(), mode: "octet".to_string(), options: vec![] })
}

#[tokio::test]
async fn e1_rrq_file_not_found() {
	let dir = tempfile::tempdir().unwrap();
	let (server_addr, _cancel) = start_server(dir.path().to_path_buf()).await;

	let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
	client.send_to(&rrq("Wrong.txt", &[]).encode(), server_addr).await.unwrap();

	let (pkt, _) = recv_packet(&client).await;
	assert_eq!(pkt, Packet::Error { code: ErrorCode::FileNotFound, message: "file not found".to_string() });
}

#[tokio::test]
async fn e2_single_block_rrq() {
	let dir = tempfile::tempdir().unwrap();
	let content = b"short file contents";
	tokio::fs::write(dir.path().join("MyFile.txt"), content).await.unwrap();
	let (server_addr, _cancel) = start_server(dir.path().to_path_buf()).await;

	let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
	client.send_to(&rrq("MyFile.txt", &[]).encode(), server_addr).await.unwrap();

	let (pkt, from) = recv_packet(&client).await;
	assert_eq!(pkt, Packet::Data { block: 1, data: content.to_vec() });

	client.send_to(&Packet::Ack { block: 1 }.encode(), from).await.unwrap();

	// No further packets should follow; a short timeout confirms completion.
	let mut buf = [0u8; 16];
	let res = tokio::time::timeout(Duration::from_millis(200), client.recv_from(&mut buf)).await;
	assert!(res.is_err(), "server kept sending after the final ACK");
}

#[tokio::test]
async fn e3_exact_multiple_rrq() {
	let dir = tempfile::tempdir().unwrap();
	let content = vec![0x5Au8; 1024];
	tokio::fs::write(dir.path().join("exact.bin"), &content).await.unwrap();
	let (server_addr, _cancel) = start_server(dir.path().to_path_buf()).await;

	let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
	client.send_to(&rrq("exact.bin", &[]).encode(), server_addr).await.unwrap();

	let mut received = Vec::new();
	let mut from = server_addr;
	for expected_block in 1u16..=3 {
		let (pkt, peer) = recv_packet(&client).await;
		from = peer;
		let Packet::Data { block, data } = pkt else { panic!("expected DATA") };
		assert_eq!(block, expected_block);
		if expected_block < 3 {
			assert_eq!(data.len(), 512);
		} else {
			assert!(data.is_empty(), "third block should be the empty terminator");
		}
		received.extend_from_slice(&data);
		client.send_to(&Packet::Ack { block }.encode(), from).await.unwrap();
	}

	assert_eq!(received, content);
}

#[tokio::test]
async fn e4_wrq_single_block() {
	let dir = tempfile::tempdir().unwrap();
	let (server_addr, _cancel) = start_server(dir.path().to_path_buf()).await;
	let payload = b"My single data block. Less than 512 bytes.";

	let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
	client.send_to(&wrq("new.bin").encode(), server_addr).await.unwrap();

	let (pkt, from) = recv_packet(&client).await;
	assert_eq!(pkt, Packet::Ack { block: 0 });

	client.send_to(&Packet::Data { block: 1, data: payload.to_vec() }.encode(), from).await.unwrap();
	let (pkt, _) = recv_packet(&client).await;
	assert_eq!(pkt, Packet::Ack { block: 1 });

	tokio::time::sleep(Duration::from_millis(100)).await;
	let written = tokio::fs::read(dir.path().join("new.bin")).await.unwrap();
	assert_eq!(written, payload);
}

#[tokio::test]
async fn e5_tid_violation_mid_wrq() {
	let dir = tempfile::tempdir().unwrap();
	let (server_addr, _cancel) = start_server(dir.path().to_path_buf()).await;

	let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
	let foreign = UdpSocket::bind("127.0.0.1:0").await.unwrap();

	client.send_to(&wrq("race.bin").encode(), server_addr).await.unwrap();
	let (pkt, from) = recv_packet(&client).await;
	assert_eq!(pkt, Packet::Ack { block: 0 });

	client.send_to(&Packet::Data { block: 1, data: vec![b'a'; 512] }.encode(), from).await.unwrap();
	let (pkt, _) = recv_packet(&client).await;
	assert_eq!(pkt, Packet::Ack { block: 1 });

	client.send_to(&Packet::Data { block: 2, data: vec![b'b'; 512] }.encode(), from).await.unwrap();
	let (pkt, _) = recv_packet(&client).await;
	assert_eq!(pkt, Packet::Ack { block: 2 });

	foreign.send_to(&Packet::Data { block: 3, data: vec![b'x'; 512] }.encode(), from).await.unwrap();
	let (pkt, to_foreign) = recv_packet(&foreign).await;
	assert_eq!(pkt, Packet::Error { code: ErrorCode::UnknownTid, message: "Invalid TID".to_string() });
	assert_eq!(to_foreign, from);

	client.send_to(&Packet::Data { block: 3, data: vec![b'c'; 512] }.encode(), from).await.unwrap();
	let (pkt, _) = recv_packet(&client).await;
	assert_eq!(pkt, Packet::Ack { block: 3 });

	client.send_to(&Packet::Data { block: 4, data: vec![b'd'; 10] }.encode(), from).await.unwrap();
	let (pkt, _) = recv_packet(&client).await;
	assert_eq!(pkt, Packet::Ack { block: 4 });

	tokio::time::sleep(Duration::from_millis(100)).await;
	let written = tokio::fs::read(dir.path().join("race.bin")).await.unwrap();
	let mut expected = vec![b'a'; 512];
	expected.extend(vec![b'b'; 512]);
	expected.extend(vec![b'c'; 512]);
	expected.extend(vec![b'd'; 10]);
	assert_eq!(written, expected);
}

#[tokio::test]
async fn e6_illegal_blksize() {
	let dir = tempfile::tempdir().unwrap();
	tokio::fs::write(dir.path().join("f.bin"), b"x").await.unwrap();
	let (server_addr, _cancel) = start_server(dir.path().to_path_buf()).await;

	let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
	client.send_to(&rrq("f.bin", &[("blksize", "51o2o")]).encode(), server_addr).await.unwrap();

	let (pkt, _) = recv_packet(&client).await;
	assert!(matches!(pkt, Packet::Error { code: ErrorCode::OptionFailure, .. }));

	let mut buf = [0u8; 16];
	let res = tokio::time::timeout(Duration::from_millis(200), client.recv_from(&mut buf)).await;
	assert!(res.is_err(), "no further packets expected after OptionFailure");
}

#[tokio::test]
async fn e7_tsize_oack_then_three_block_stream() {
	let dir = tempfile::tempdir().unwrap();
	let content = vec![0xAAu8; 1024];
	tokio::fs::write(dir.path().join("sized.bin"), &content).await.unwrap();
	let (server_addr, _cancel) = start_server(dir.path().to_path_buf()).await;

	let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
	client.send_to(&rrq("sized.bin", &[("tsize", "0")]).encode(), server_addr).await.unwrap();

	let (pkt, from) = recv_packet(&client).await;
	let Packet::OAck { options } = pkt else { panic!("expected OACK") };
	assert_eq!(options, vec![("tsize".to_string(), "1024".to_string())]);

	client.send_to(&Packet::Ack { block: 0 }.encode(), from).await.unwrap();

	let mut received = Vec::new();
	for expected_block in 1u16..=3 {
		let (pkt, _) = recv_packet(&client).await;
		let Packet::Data { block, data } = pkt else { panic!("expected DATA") };
		assert_eq!(block, expected_block);
		received.extend_from_slice(&data);
		client.send_to(&Packet::Ack { block }.encode(), from).await.unwrap();
	}

	assert_eq!(received, content);
}

/// P5: for B=4 and a 262143-byte file, the server sends 65536 DATA packets
/// in all, with on-wire block numbers 1..=65535 followed by a single wrap
/// back to 1 for the final (3-byte) packet. 262143 mod 4 == 3, not 0, so no
/// trailing empty block is appended; the source's counter resets to 1, not
/// 0, once it exceeds 0xffff (`server/readoperation.py`).
#[tokio::test]
async fn p5_block_number_wrap() {
	let dir = tempfile::tempdir().unwrap();
	let content = vec![0x11u8; 262143];
	tokio::fs::write(dir.path().join("big.bin"), &content).await.unwrap();
	let (server_addr, _cancel) = start_server(dir.path().to_path_buf()).await;

	let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
	client.send_to(&rrq("big.bin", &[("blksize", "4")]).encode(), server_addr).await.unwrap();

	let (pkt, from) = recv_packet(&client).await;
	let Packet::OAck { options } = pkt else { panic!("expected OACK for blksize") };
	assert_eq!(options, vec![("blksize".to_string(), "4".to_string())]);
	client.send_to(&Packet::Ack { block: 0 }.encode(), from).await.unwrap();

	let mut total_packets = 0u32;
	let mut received = Vec::new();
	let mut last_block = 0u16;
	loop {
		let (pkt, _) = recv_packet(&client).await;
		let Packet::Data { block, data } = pkt else { panic!("expected DATA") };
		total_packets += 1;
		last_block = block;
		let is_last = data.len() < 4;
		received.extend_from_slice(&data);
		client.send_to(&Packet::Ack { block }.encode(), from).await.unwrap();
		if is_last {
			break;
		}
	}

	assert_eq!(total_packets, 65536);
	assert_eq!(last_block, 1, "block counter wraps 65535 -> 1, not to 0");
	assert_eq!(received, content);
}

#[tokio::test]
async fn p4_tid_violation_during_rrq_leaves_transfer_unaffected() {
	let dir = tempfile::tempdir().unwrap();
	let content = b"content for the tid violation check";
	tokio::fs::write(dir.path().join("tid.bin"), content).await.unwrap();
	let (server_addr, _cancel) = start_server(dir.path().to_path_buf()).await;

	let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
	let foreign = UdpSocket::bind("127.0.0.1:0").await.unwrap();

	client.send_to(&rrq("tid.bin", &[]).encode(), server_addr).await.unwrap();
	let (pkt, from) = recv_packet(&client).await;
	assert_eq!(pkt, Packet::Data { block: 1, data: content.to_vec() });

	foreign.send_to(&Packet::Ack { block: 1 }.encode(), from).await.unwrap();
	let (pkt, to_foreign) = recv_packet(&foreign).await;
	assert_eq!(pkt, Packet::Error { code: ErrorCode::UnknownTid, message: "Invalid TID".to_string() });
	assert_eq!(to_foreign, from);

	client.send_to(&Packet::Ack { block: 1 }.encode(), from).await.unwrap();

	let mut buf = [0u8; 16];
	let res = tokio::time::timeout(Duration::from_millis(200), client.recv_from(&mut buf)).await;
	assert!(res.is_err(), "transfer should have completed cleanly after the real ACK");
}
