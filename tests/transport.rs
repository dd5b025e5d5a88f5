mod common;

use common::{orchestrator, payload, test_config, MemorySink};
use media_relay::{AppError, DownloadLink, VideoRequest};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Upstream that resets the first `resets` GET connections, then serves `body`.
async fn flaky_upstream(resets: usize, body: Vec<u8>) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let gets = Arc::new(AtomicUsize::new(0));
    let counter = gets.clone();

    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                return;
            };
            let counter = counter.clone();
            let body = body.clone();
            tokio::spawn(async move {
                serve(socket, resets, &counter, &body).await;
            });
        }
    });

    (format!("http://{}", addr), gets)
}

async fn serve(mut socket: TcpStream, resets: usize, gets: &AtomicUsize, body: &[u8]) {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => request.extend_from_slice(&buf[..n]),
        }
    }

    if request.starts_with(b"HEAD") {
        let _ = socket
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
            .await;
        return;
    }

    let attempt = gets.fetch_add(1, Ordering::SeqCst) + 1;
    if attempt <= resets {
        // Zero linger turns the close into a TCP reset.
        let _ = socket.set_linger(Some(Duration::ZERO));
        drop(socket);
        return;
    }

    let head = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: video/mp4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    let _ = socket.write_all(head.as_bytes()).await;
    let _ = socket.write_all(body).await;
    let _ = socket.shutdown().await;
}

fn request(base: &str) -> VideoRequest {
    VideoRequest {
        download_links: Some(vec![DownloadLink::new(format!("{}/a.mp4", base), "MP4")]),
        title: "t".to_string(),
        ..VideoRequest::default()
    }
}

#[tokio::test]
async fn succeeds_on_third_attempt_after_connection_resets() {
    let body = payload(256 * 1024);
    let (base, gets) = flaky_upstream(2, body.clone()).await;

    let orchestrator = orchestrator(&test_config());
    let mut sink = MemorySink::default();
    let outcome = orchestrator.download_video(&request(&base), &mut sink).await.unwrap();

    assert_eq!(gets.load(Ordering::SeqCst), 3);
    assert_eq!(outcome.bytes_written, body.len() as u64);
    assert_eq!(sink.body, body);
    assert_eq!(sink.head.unwrap().content_length, Some(body.len() as u64));
    assert_eq!(orchestrator.performance_report().successful_downloads, 1);
}

#[tokio::test]
async fn resets_on_every_attempt_exhaust_retries() {
    let (base, gets) = flaky_upstream(usize::MAX, Vec::new()).await;

    let orchestrator = orchestrator(&test_config());
    let mut sink = MemorySink::default();
    let err = orchestrator.download_video(&request(&base), &mut sink).await.unwrap_err();

    match err {
        AppError::RetryExhausted { attempts, source } => {
            assert_eq!(attempts, 3);
            assert!(matches!(*source, AppError::Transport { .. }));
        }
        other => panic!("expected RetryExhausted, got {:?}", other),
    }
    assert_eq!(gets.load(Ordering::SeqCst), 3);
    assert!(sink.head.is_none());
    assert_eq!(sink.error.unwrap().kind, "retry_exhausted");
}

#[tokio::test]
async fn unreachable_host_is_a_transport_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let orchestrator = orchestrator(&test_config());
    let mut sink = MemorySink::default();
    let err = orchestrator
        .download_video(&request(&format!("http://{}", addr)), &mut sink)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AppError::RetryExhausted { ref source, .. } if matches!(**source, AppError::Transport { .. })
    ));
    assert_eq!(orchestrator.performance_report().total_downloads, 1);
}
