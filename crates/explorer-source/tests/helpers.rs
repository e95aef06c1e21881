#![allow(dead_code)]

use explorer_core::{Author, SignalType, Transaction};
use rand::Rng;
use std::path::PathBuf;
use tempfile::{tempdir, TempDir};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
};

pub fn signal(i: usize, is_bot: bool) -> Transaction {
    Transaction {
        id: format!("signal-{i}"),
        kind: if is_bot {
            SignalType::News
        } else {
            SignalType::SocialSentiment
        },
        author: Author {
            id: format!("user-{i}"),
            name: if is_bot { "Wire Bot".into() } else { format!("User {i}") },
            handle: format!("@user{i}"),
            is_verified: i % 2 == 0,
            is_bot,
        },
        title: format!("Signal number {i}"),
        content: format!("Content for signal {i}"),
    }
}

/// `count` signals with a random sprinkling of bot authors.
pub fn random_feed(count: usize) -> Vec<Transaction> {
    let mut rng = rand::thread_rng();
    (0..count).map(|i| signal(i, rng.gen_bool(0.3))).collect()
}

pub fn write_feed(transactions: &[Transaction]) -> (TempDir, PathBuf) {
    // Create a temporary directory holding the feed file
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let path = temp_dir.path().join("feed.json");
    let json = serde_json::to_vec_pretty(transactions).expect("Failed to encode feed");
    std::fs::write(&path, json).expect("Failed to write feed");
    (temp_dir, path)
}

pub fn write_raw(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let path = temp_dir.path().join("feed.json");
    std::fs::write(&path, contents).expect("Failed to write feed");
    (temp_dir, path)
}

/// Serve exactly one HTTP response on a local port and return the feed URL.
pub async fn serve_once(status_line: &'static str, body: String) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });
    format!("http://{addr}/signals")
}
