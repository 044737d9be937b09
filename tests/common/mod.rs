//! A throwaway HTTP backend for exercising the real transports.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub struct MockBackend {
    pub base_url: String,
    requests: Arc<Mutex<Vec<String>>>,
}

impl MockBackend {
    /// Every request received so far, head and body, as text.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

/// Serve `status` and then `chunks` (flushed one by one) on every connection,
/// closing the socket to end the body.
pub async fn mock_backend(status: &'static str, chunks: Vec<&'static str>) -> MockBackend {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let requests = Arc::new(Mutex::new(Vec::new()));
    let seen = requests.clone();

    tokio::spawn(async move {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else {
                return;
            };
            let seen = seen.clone();
            let chunks = chunks.clone();
            tokio::spawn(async move {
                let request = read_request(&mut sock).await;
                seen.lock().unwrap().push(request);
                let head = format!(
                    "HTTP/1.1 {}\r\nContent-Type: application/octet-stream\r\nConnection: close\r\n\r\n",
                    status
                );
                if sock.write_all(head.as_bytes()).await.is_err() {
                    return;
                }
                for chunk in chunks {
                    if sock.write_all(chunk.as_bytes()).await.is_err() {
                        return;
                    }
                    let _ = sock.flush().await;
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                let _ = sock.shutdown().await;
            });
        }
    });

    MockBackend { base_url: format!("http://{}", addr), requests }
}

/// Read one request, honouring Content-Length.
pub async fn read_request(sock: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 4096];
    loop {
        let n = match sock.read(&mut tmp).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        buf.extend_from_slice(&tmp[..n]);
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
            let len = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + len {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// An address nothing is listening on.
pub async fn dead_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    format!("http://{}", addr)
}

pub const OLLAMA_HI_THERE: [&str; 3] = [
    "{\"message\":{\"role\":\"assistant\",\"content\":\"Hi\"},\"done\":false}\n",
    "\n{\"message\":{\"role\":\"assistant\"},\"done\":false}\n{\"message\":{\"content\":\" th",
    "ere\"},\"done\":false}\n{\"done\":true}\n",
];

pub const OPENROUTER_HELLO: [&str; 5] = [
    ": OPENROUTER PROCESSING\n\n",
    "data: {\"choices\":[{\"delta\":{\"content\":\"<s>\"}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"</s>\"}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{\"content\":null},\"finish_reason\":\"stop\"}]}\n\n",
    "data: [DONE]\n\n",
];

/// Everything before "Hello" is filtered out: a keep-alive, a sentinel and a
/// null delta.
pub const OPENROUTER_FILTERED_LEAD: [&str; 5] = [
    ": OPENROUTER PROCESSING\n\n",
    "data: {\"choices\":[{\"delta\":{\"content\":\"<s>\"}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{\"content\":null}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"</s>\"}}]}\n\n",
    "data: [DONE]\n\n",
];

/// Blank and content-less lines before the first real token.
pub const OLLAMA_FILTERED_LEAD: [&str; 4] = [
    "\n\n",
    "{\"message\":{\"role\":\"assistant\"},\"done\":false}\n",
    "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":false}\n",
    "{\"message\":{\"content\":\"Hi\"},\"done\":false}\n{\"done\":true}\n",
];
