//! Auth session behavior against a minimal local TES responder: concurrent
//! callers must share a single challenge exchange, and a live session must
//! be reused without touching the network again.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use veilnote_sdk::{
    LedgerDb, SdkConfig, TaskSerializer, TesClient, ViewAccount, ViewAccountManager,
};

const MAIN_ADDRESS: &str = "0x2222222222222222222222222222222222222222";

/// One-route-per-path HTTP stub: answers the challenge endpoints and counts
/// how many init requests it saw.
async fn spawn_stub() -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let init_hits = Arc::new(AtomicUsize::new(0));

    let hits = init_hits.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let hits = hits.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 8192];
                let mut read = 0;
                loop {
                    match socket.read(&mut buf[read..]).await {
                        Ok(0) => break,
                        Ok(n) => {
                            read += n;
                            if buf[..read].windows(4).any(|w| w == b"\r\n\r\n")
                                || read == buf.len()
                            {
                                break;
                            }
                        }
                        Err(_) => return,
                    }
                }

                let request = String::from_utf8_lossy(&buf[..read]);
                let path = request.split_whitespace().nth(1).unwrap_or("");
                let body = if path.starts_with("/challenge/init/") {
                    hits.fetch_add(1, Ordering::SeqCst);
                    r#"{"random":"0xdeadbeefdeadbeef"}"#.to_string()
                } else if path.starts_with("/challenge/solve") {
                    let exp = SystemTime::now()
                        .duration_since(UNIX_EPOCH)
                        .unwrap()
                        .as_secs()
                        + 3600;
                    format!(r#"{{"exp":{},"csrf":"csrf-1"}}"#, exp)
                } else {
                    "{}".to_string()
                };

                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (addr, init_hits)
}

fn client_against(addr: SocketAddr, dir: &tempfile::TempDir) -> TesClient {
    let config = SdkConfig::default()
        .with_db_path(dir.path().join("ledger"))
        .with_tes_url(&format!("http://{}", addr));

    let db = LedgerDb::open(&config).unwrap();
    let manager = ViewAccountManager::new(&db);
    let (key, _) = manager.prepare_view_account(MAIN_ADDRESS, "pw");
    let view = Arc::new(ViewAccount::new(key, MAIN_ADDRESS, vec![0u8; 65]));

    TesClient::new(&config, view, Arc::new(TaskSerializer::new())).unwrap()
}

#[tokio::test]
async fn concurrent_callers_share_one_challenge_exchange() {
    let (addr, init_hits) = spawn_stub().await;
    let dir = tempfile::tempdir().unwrap();
    let client = Arc::new(client_against(addr, &dir));

    // Five callers race; queued ones must re-check the session and reuse
    // the first exchange instead of re-challenging.
    let mut handles = Vec::new();
    for _ in 0..5 {
        let client = client.clone();
        handles.push(tokio::spawn(async move { client.manage_auth().await }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), "csrf-1");
    }
    assert_eq!(init_hits.load(Ordering::SeqCst), 1);

    // A later caller rides the live session; no further network traffic.
    assert_eq!(client.manage_auth().await.unwrap(), "csrf-1");
    assert_eq!(init_hits.load(Ordering::SeqCst), 1);
}
