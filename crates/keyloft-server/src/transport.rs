//! TCP transport listener.
//!
//! One line per message: `<sender-identity> <payload>`, newline
//! terminated. Each complete payload (envelope or fragment) goes through
//! `Engine::handle`; responses are written back one per line. Errors are
//! logged and produce no reply — the protocol never answers a failed
//! step.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use crate::engine::Engine;

/// Accept connections forever, spawning one task per connection.
pub async fn serve(listener: TcpListener, engine: Arc<Engine>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move {
                    handle_connection(stream, &peer.to_string(), &engine).await;
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, peer: &str, engine: &Engine) {
    tracing::debug!(%peer, "connection opened");
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(%peer, error = %e, "read failed");
                break;
            }
        };

        let Some((from, payload)) = line.split_once(' ') else {
            tracing::debug!(%peer, "dropping line without sender identity");
            continue;
        };

        match engine.handle(from, payload) {
            Ok(responses) => {
                for response in responses {
                    if let Err(e) = write_half.write_all(response.as_bytes()).await {
                        tracing::debug!(%peer, error = %e, "write failed");
                        return;
                    }
                    if let Err(e) = write_half.write_all(b"\n").await {
                        tracing::debug!(%peer, error = %e, "write failed");
                        return;
                    }
                }
            }
            Err(e) => {
                // No reply for failed steps; the reason stays server-side.
                tracing::warn!(%peer, %from, error = %e, "message rejected");
            }
        }
    }
    tracing::debug!(%peer, "connection closed");
}
