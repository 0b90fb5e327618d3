use crate::config::TcpConfig;
use crate::engine::handler::ConnectionHandler;
use crate::engine::status::{ConnectionStatus, SharedStatus};
use crate::server::ListenerSet;
use parking_lot::Mutex;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, DuplexStream,
    ReadBuf,
};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const PORT: u16 = 9000;
const LIMIT: Duration = Duration::from_secs(5);

struct Harness {
    client: DuplexStream,
    task: JoinHandle<SharedStatus>,
    cancel: CancellationToken,
    listeners: Arc<ListenerSet>,
}

fn start(mut config: TcpConfig) -> Harness {
    config.port = PORT;
    config.resolve().unwrap();

    let listeners = Arc::new(ListenerSet::new("test-host"));
    let listener_id = listeners.open(PORT);
    let status = Arc::new(Mutex::new(ConnectionStatus::new(PORT, 1, &listener_id)));
    let cancel = CancellationToken::new();
    let (server, client) = tokio::io::duplex(64 * 1024);

    let handler = ConnectionHandler::new(server, config, status, listeners.clone(), cancel.clone());
    Harness {
        client,
        task: tokio::spawn(handler.run()),
        cancel,
        listeners,
    }
}

async fn finish(task: JoinHandle<SharedStatus>) -> ConnectionStatus {
    let status = timeout(LIMIT, task).await.unwrap().unwrap();
    let status = status.lock().clone();
    assert!(status.closed);
    assert!(status.connection_close_time.is_some());
    status
}

async fn read_all(client: &mut DuplexStream) -> String {
    let mut out = String::new();
    timeout(LIMIT, client.read_to_string(&mut out))
        .await
        .unwrap()
        .unwrap();
    out
}

async fn read_exact(client: &mut DuplexStream, n: usize) -> Vec<u8> {
    let mut out = vec![0u8; n];
    timeout(LIMIT, client.read_exact(&mut out))
        .await
        .unwrap()
        .unwrap();
    out
}

#[tokio::test]
async fn test_echo_rechunks_to_response_size() {
    let mut h = start(TcpConfig {
        echo_response_size: 4,
        ..Default::default()
    });

    h.client.write_all(b"abcdefghij").await.unwrap();
    assert_eq!(read_exact(&mut h.client, 8).await, b"abcdefgh");

    h.client.write_all(b"kl").await.unwrap();
    assert_eq!(read_exact(&mut h.client, 4).await, b"ijkl");

    h.client.write_all(b"mno").await.unwrap();
    drop(h.client);

    let status = finish(h.task).await;
    assert!(status.client_closed);
    assert_eq!(status.total_bytes_read, 15);
    assert_eq!(status.total_bytes_sent, 12);
}

#[tokio::test]
async fn test_echo_without_size_echoes_each_read() {
    let mut h = start(TcpConfig::default());
    h.client.write_all(b"hello").await.unwrap();
    assert_eq!(read_exact(&mut h.client, 5).await, b"hello");
    drop(h.client);
    assert!(finish(h.task).await.client_closed);
}

#[tokio::test]
async fn test_read_timeout_classification() {
    let h = start(TcpConfig {
        read_timeout: "100ms".to_string(),
        conn_idle_timeout: "1s".to_string(),
        ..Default::default()
    });
    let status = finish(h.task).await;
    assert!(status.read_timeout);
    assert!(!status.idle_timeout && !status.life_timeout);
    drop(h.client);

    let h = start(TcpConfig {
        read_timeout: "1s".to_string(),
        conn_idle_timeout: "100ms".to_string(),
        ..Default::default()
    });
    let status = finish(h.task).await;
    assert!(status.idle_timeout);
    assert!(!status.read_timeout);
    drop(h.client);
}

#[tokio::test]
async fn test_forced_close_ends_blocked_read() {
    let h = start(TcpConfig::default());
    tokio::time::sleep(Duration::from_millis(20)).await;
    h.cancel.cancel();
    let status = finish(h.task).await;
    assert!(status.server_closed);
    assert!(!status.client_closed);
}

#[tokio::test]
async fn test_listener_replacement_stops_loop() {
    let mut h = start(TcpConfig::default());
    h.client.write_all(b"ab").await.unwrap();
    assert_eq!(read_exact(&mut h.client, 2).await, b"ab");

    tokio::time::sleep(Duration::from_millis(50)).await;
    h.listeners.open(PORT);
    h.client.write_all(b"cd").await.unwrap();
    // The pending read completes, then the loop sees the new listener id
    let rest = read_all(&mut h.client).await;
    assert!(rest == "cd" || rest.is_empty(), "{rest}");

    let status = finish(h.task).await;
    assert!(status.server_closed);
}

#[tokio::test]
async fn test_conversation_protocol() {
    let h = start(TcpConfig {
        conversation: true,
        ..Default::default()
    });
    let (reader, mut writer) = tokio::io::split(h.client);
    let mut lines = BufReader::new(reader).lines();

    for (sent, expected) in [
        ("hello there\n", "[test-host]HELLO"),
        ("BEGIN/42/END\n", "[test-host]ACK/42/END"),
        ("\nwhat now\n", "[test-host]ERROR"),
        ("GOODBYE\n", "[test-host]GOODBYE"),
    ] {
        writer.write_all(sent.as_bytes()).await.unwrap();
        let reply = timeout(LIMIT, lines.next_line()).await.unwrap().unwrap();
        assert_eq!(reply.as_deref(), Some(expected));
    }

    let status = finish(h.task).await;
    assert!(status.server_closed);
}

#[tokio::test]
async fn test_conversation_ignores_lines_before_hello() {
    let h = start(TcpConfig {
        conversation: true,
        ..Default::default()
    });
    let (reader, mut writer) = tokio::io::split(h.client);
    let mut lines = BufReader::new(reader).lines();

    writer.write_all(b"BEGIN/1/END\nHELLO\n").await.unwrap();
    let line = timeout(LIMIT, lines.next_line()).await.unwrap().unwrap();
    assert_eq!(line.as_deref(), Some("[test-host]HELLO"));

    drop(writer);
    drop(lines);
    assert!(finish(h.task).await.client_closed);
}

fn expecting(payload: &[u8], life: &str) -> TcpConfig {
    let mut config = TcpConfig {
        connection_life: life.to_string(),
        ..Default::default()
    };
    config.set_expected_payload(payload.to_vec());
    config
}

#[tokio::test]
async fn test_payload_validation_success() {
    let mut h = start(expecting(b"abcde", ""));
    h.client.write_all(b"abcde").await.unwrap();
    let verdict = read_all(&mut h.client).await;
    assert!(verdict.starts_with("[test-host][SUCCESS]"), "{verdict}");
    assert!(finish(h.task).await.server_closed);
}

#[tokio::test]
async fn test_payload_validation_exceeded() {
    let mut h = start(expecting(b"abcde", ""));
    h.client.write_all(b"abcdef").await.unwrap();
    let verdict = read_all(&mut h.client).await;
    assert!(verdict.contains("EXCEEDED"), "{verdict}");
    finish(h.task).await;
}

#[tokio::test]
async fn test_payload_validation_content_mismatch() {
    let mut h = start(expecting(b"abcde", ""));
    h.client.write_all(b"abcdX").await.unwrap();
    let verdict = read_all(&mut h.client).await;
    assert!(verdict.contains("CONTENT"), "{verdict}");
    finish(h.task).await;
}

#[tokio::test]
async fn test_payload_validation_timeout() {
    let mut h = start(expecting(b"abcde", "300ms"));
    h.client.write_all(b"abc").await.unwrap();
    let verdict = read_all(&mut h.client).await;
    assert!(verdict.contains("TIMEOUT"), "{verdict}");

    let status = finish(h.task).await;
    assert!(status.life_timeout);
    assert_eq!(status.total_bytes_read, 3);
}

#[tokio::test]
async fn test_stream_repeats_one_chunk() {
    let mut config = TcpConfig {
        stream: true,
        stream_chunk_size: "10".to_string(),
        stream_chunk_count: 3,
        stream_chunk_delay: "10ms".to_string(),
        ..Default::default()
    };
    config.resolve().unwrap();
    assert_eq!(config.stream_params.duration, Duration::from_millis(30));

    let mut h = start(config);
    let body = read_all(&mut h.client).await;
    assert_eq!(body.len(), 30);
    assert_eq!(&body[..10], &body[10..20]);
    assert_eq!(&body[10..20], &body[20..]);

    let status = finish(h.task).await;
    assert_eq!(status.total_writes, 3);
    assert_eq!(status.total_reads, 0);
}

#[tokio::test]
async fn test_response_payloads_repeat_on_empty_entry() {
    let mut h = start(TcpConfig {
        payload: true,
        stream: true,
        response_payloads: vec!["one".into(), "".into(), "two".into()],
        ..Default::default()
    });
    assert_eq!(read_all(&mut h.client).await, "oneonetwo");
    assert!(finish(h.task).await.server_closed);
}

#[tokio::test]
async fn test_response_payloads_after_read() {
    let mut h = start(TcpConfig {
        payload: true,
        respond_after_read: true,
        response_payloads: vec!["A".into(), "B".into()],
        ..Default::default()
    });
    h.client.write_all(b"x").await.unwrap();
    assert_eq!(read_exact(&mut h.client, 1).await, b"A");
    h.client.write_all(b"y").await.unwrap();
    assert_eq!(read_all(&mut h.client).await, "B");

    let status = finish(h.task).await;
    assert_eq!(status.total_bytes_read, 2);
}

#[tokio::test]
async fn test_response_payloads_keep_open_until_life_ends() {
    let mut h = start(TcpConfig {
        payload: true,
        keep_open: true,
        connection_life: "200ms".to_string(),
        response_payloads: vec!["hi".into()],
        ..Default::default()
    });
    let started = tokio::time::Instant::now();
    assert_eq!(read_all(&mut h.client).await, "hi");
    assert!(started.elapsed() >= Duration::from_millis(150));
    assert!(finish(h.task).await.life_timeout);
}

#[tokio::test]
async fn test_silent_life_reports_bytes_received() {
    let mut h = start(TcpConfig {
        connection_life: "200ms".to_string(),
        ..Default::default()
    });
    h.client.write_all(b"12345").await.unwrap();
    let farewell = read_all(&mut h.client).await;
    assert!(farewell.starts_with("[test-host]"), "{farewell}");
    assert!(farewell.contains("received 5 bytes"), "{farewell}");

    let status = finish(h.task).await;
    assert!(status.life_timeout);
    assert_eq!(status.total_bytes_sent as usize, farewell.len());
}

#[tokio::test]
async fn test_close_at_first_byte() {
    let mut h = start(TcpConfig {
        close_at_first_byte: true,
        ..Default::default()
    });
    h.client.write_all(b"x").await.unwrap();
    assert_eq!(read_all(&mut h.client).await, "[test-host]GOODBYE\n");

    let status = finish(h.task).await;
    assert!(status.server_closed);
    assert_eq!(status.total_bytes_read, 1);
}

#[tokio::test]
async fn test_close_at_first_byte_against_scripted_client() {
    let mut config = TcpConfig {
        close_at_first_byte: true,
        ..TcpConfig::new(PORT)
    };
    config.resolve().unwrap();

    let listeners = Arc::new(ListenerSet::new("test-host"));
    let listener_id = listeners.open(PORT);
    let status = Arc::new(Mutex::new(ConnectionStatus::new(PORT, 1, &listener_id)));
    let client = tokio_test::io::Builder::new()
        .read(b"z")
        .write(b"[test-host]GOODBYE\n")
        .build();

    let handler = ConnectionHandler::new(client, config, status, listeners, CancellationToken::new());
    let status = handler.run().await.lock().clone();
    assert!(status.server_closed);
    assert_eq!(status.total_reads, 1);
    assert_eq!(status.total_writes, 1);
}

/// Peer that never sends, never drains writes and never finishes a shutdown
struct StalledPeer;

impl AsyncRead for StalledPeer {
    fn poll_read(self: Pin<&mut Self>, _: &mut Context<'_>, _: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Poll::Pending
    }
}

impl AsyncWrite for StalledPeer {
    fn poll_write(self: Pin<&mut Self>, _: &mut Context<'_>, _: &[u8]) -> Poll<io::Result<usize>> {
        Poll::Pending
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Pending
    }
}

#[tokio::test]
async fn test_validation_with_huge_expected_length() {
    let mut config = TcpConfig {
        connection_life: "200ms".to_string(),
        ..Default::default()
    };
    config.set_expected_payload_length(usize::MAX);

    let mut h = start(config);
    h.client.write_all(b"abc").await.unwrap();
    let verdict = read_all(&mut h.client).await;
    assert!(verdict.contains("TIMEOUT"), "{verdict}");

    let status = finish(h.task).await;
    assert!(status.life_timeout);
    assert_eq!(status.total_bytes_read, 3);
}

#[tokio::test]
async fn test_keep_open_without_life_outlasts_read_timeouts() {
    let mut h = start(TcpConfig {
        payload: true,
        keep_open: true,
        read_timeout: "100ms".to_string(),
        response_payloads: vec!["hi".into()],
        ..Default::default()
    });
    assert_eq!(read_exact(&mut h.client, 2).await, b"hi");

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(!h.task.is_finished());

    drop(h.client);
    let status = finish(h.task).await;
    assert!(status.client_closed);
    assert!(!status.read_timeout);
}

#[tokio::test]
async fn test_stream_stops_when_force_closed() {
    let mut h = start(TcpConfig {
        stream: true,
        stream_chunk_size: "10".to_string(),
        stream_chunk_count: 50,
        stream_chunk_delay: "20ms".to_string(),
        ..Default::default()
    });
    read_exact(&mut h.client, 10).await;
    h.cancel.cancel();

    let rest = read_all(&mut h.client).await;
    assert!(rest.len() < 490, "{}", rest.len());

    let status = finish(h.task).await;
    assert!(status.server_closed);
    assert!(status.total_writes < 50);
}

#[tokio::test]
async fn test_stream_stops_when_life_ends() {
    let mut h = start(TcpConfig {
        stream: true,
        connection_life: "100ms".to_string(),
        stream_chunk_size: "10".to_string(),
        stream_chunk_count: 50,
        stream_chunk_delay: "20ms".to_string(),
        ..Default::default()
    });
    let body = read_all(&mut h.client).await;

    let status = finish(h.task).await;
    assert!(status.life_timeout);
    assert!(status.total_writes < 50);
    assert_eq!(status.total_bytes_sent as usize, body.len());
}

#[tokio::test]
async fn test_echo_response_delay_paces_chunks() {
    let mut h = start(TcpConfig {
        echo_response_size: 2,
        echo_response_delay: "50ms".to_string(),
        ..Default::default()
    });
    let started = tokio::time::Instant::now();
    h.client.write_all(b"abcdef").await.unwrap();
    assert_eq!(read_exact(&mut h.client, 6).await, b"abcdef");
    assert!(started.elapsed() >= Duration::from_millis(140));

    drop(h.client);
    let status = finish(h.task).await;
    assert_eq!(status.total_writes, 3);
}

#[tokio::test]
async fn test_write_timeout_marks_error_closed() {
    // The client never reads, so a chunk larger than the pipe cannot drain
    let h = start(TcpConfig {
        stream: true,
        write_timeout: "100ms".to_string(),
        stream_chunk_size: "100000".to_string(),
        stream_chunk_count: 1,
        ..Default::default()
    });
    let status = finish(h.task).await;
    assert!(status.error_closed);
    assert!(!status.server_closed && !status.client_closed);
    assert_eq!(status.total_writes, 0);
    drop(h.client);
}

#[tokio::test]
async fn test_write_timeout_skips_shutdown() {
    let mut config = TcpConfig {
        stream: true,
        write_timeout: "300ms".to_string(),
        stream_chunk_size: "10".to_string(),
        stream_chunk_count: 1,
        ..Default::default()
    };
    config.port = PORT;
    config.resolve().unwrap();

    let listeners = Arc::new(ListenerSet::new("test-host"));
    let listener_id = listeners.open(PORT);
    let status = Arc::new(Mutex::new(ConnectionStatus::new(PORT, 1, &listener_id)));
    let handler = ConnectionHandler::new(StalledPeer, config, status, listeners, CancellationToken::new());

    let started = tokio::time::Instant::now();
    let status = timeout(LIMIT, handler.run()).await.unwrap().lock().clone();
    assert!(status.error_closed);
    assert!(status.closed);
    assert!(started.elapsed() < Duration::from_millis(550));
}

#[tokio::test]
async fn test_closed_listener_stops_loop() {
    let mut h = start(TcpConfig::default());
    h.client.write_all(b"ab").await.unwrap();
    assert_eq!(read_exact(&mut h.client, 2).await, b"ab");

    tokio::time::sleep(Duration::from_millis(50)).await;
    h.listeners.close(PORT);
    h.client.write_all(b"cd").await.unwrap();
    let rest = read_all(&mut h.client).await;
    assert!(rest == "cd" || rest.is_empty(), "{rest}");

    let status = finish(h.task).await;
    assert!(status.server_closed);
    assert!(!status.client_closed);
}

#[tokio::test]
async fn test_silent_life_says_farewell_when_listener_replaced() {
    let mut h = start(TcpConfig {
        connection_life: "5s".to_string(),
        ..Default::default()
    });
    h.client.write_all(b"123").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    h.listeners.open(PORT);
    h.client.write_all(b"4").await.unwrap();
    let farewell = read_all(&mut h.client).await;
    assert!(farewell.starts_with("[test-host]Silent life over"), "{farewell}");
    assert!(farewell.contains("received 4 bytes"), "{farewell}");

    let status = finish(h.task).await;
    assert!(status.server_closed);
    assert!(!status.life_timeout);
}
