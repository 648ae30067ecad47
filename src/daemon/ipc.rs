// daemon/ipc.rs - length-prefixed JSON protocol spoken over the daemon's
// unix domain socket. One request, one response, connection closed.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UnixStream;

use crate::config::OfflineMode;
use crate::{Error, Result};

/// Messages a client (the CLI, or an operator via `todoat sync daemon ...`)
/// sends to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Report current state: uptime, sync counters, per-backend last sync.
    Status,
    /// Nudge the daemon to run a sync cycle now. Fire-and-forget from the
    /// client's point of view; repeated notifies within the daemon's
    /// debounce window collapse into a single cycle.
    Notify,
    /// Graceful shutdown: finish any in-flight sync cycle, then exit.
    Stop,
    /// Shut down immediately without waiting on in-flight work.
    Kill,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendStatus {
    pub backend_id: String,
    pub last_sync: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Status {
        pid: u32,
        started_at: DateTime<Utc>,
        last_beat: DateTime<Utc>,
        sync_count: i64,
        offline_mode: OfflineMode,
        interval_secs: u64,
        backends: Vec<BackendStatus>,
    },
    Ack,
    Error {
        message: String,
    },
}

/// Write one length-prefixed JSON message: a big-endian `u32` byte count
/// followed by that many bytes of UTF-8 JSON.
pub async fn write_message<W, T>(writer: &mut W, msg: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let bytes = serde_json::to_vec(msg)?;
    let len = u32::try_from(bytes.len()).map_err(|_| Error::Internal("ipc message too large".into()))?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_message<R, T>(reader: &mut R) -> Result<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(serde_json::from_slice(&buf)?)
}

/// Connect to the daemon's socket, send `req`, and return its response.
/// Used by the CLI for `status`/`stop`/`kill`, and for fire-and-forget
/// `notify` calls (whose reply is read and discarded by the caller).
pub async fn send_request(socket_path: &Path, req: &Request) -> Result<Response> {
    let mut stream = UnixStream::connect(socket_path)
        .await
        .map_err(|e| Error::Network(format!("daemon not reachable at {}: {e}", socket_path.display())))?;
    write_message(&mut stream, req).await?;
    read_message(&mut stream).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UnixListener;

    #[tokio::test]
    async fn roundtrips_a_request_and_response() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("daemon.sock");
        let listener = UnixListener::bind(&socket_path).unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let req: Request = read_message(&mut stream).await.unwrap();
            assert!(matches!(req, Request::Status));
            write_message(&mut stream, &Response::Ack).await.unwrap();
        });

        let response = send_request(&socket_path, &Request::Status).await.unwrap();
        assert!(matches!(response, Response::Ack));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn connect_failure_surfaces_as_network_error() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("nonexistent.sock");
        let err = send_request(&socket_path, &Request::Status).await.unwrap_err();
        assert!(matches!(err, Error::Network(_)));
    }

    #[test]
    fn request_variants_serialize_with_a_type_tag() {
        let json = serde_json::to_string(&Request::Notify).unwrap();
        assert_eq!(json, r#"{"type":"notify"}"#);
    }
}
