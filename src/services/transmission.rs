//! Transmission RPC client
//!
//! Talks to the remote download client over its JSON-RPC endpoint. The rest
//! of the system only depends on the [`DownloadClient`] trait so tests can
//! substitute a fake.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

/// Session id header, renegotiated whenever Transmission answers 409.
const SESSION_ID_HEADER: &str = "X-Transmission-Session-Id";

/// A download task as reported by the remote client.
#[derive(Debug, Clone, Serialize)]
pub struct RemoteTask {
    pub id: i64,
    pub name: String,
    pub magnet_link: String,
    pub download_dir: String,
    pub percent_done: f64,
    pub status: String,
}

/// Operations consumed from the remote download service.
#[async_trait]
pub trait DownloadClient: Send + Sync {
    /// Fetch the client's current task list.
    async fn list_tasks(&self) -> Result<Vec<RemoteTask>>;

    /// Hand a magnet link to the client to start downloading.
    async fn add_task(&self, url: &str) -> Result<()>;

    /// Forget a task by id. `delete_data` controls whether the client also
    /// removes the downloaded files from its staging directory.
    async fn remove_task(&self, id: i64, delete_data: bool) -> Result<()>;
}

/// Transmission JSON-RPC client with basic auth and session-id handling.
pub struct TransmissionClient {
    rpc_url: String,
    username: Option<String>,
    password: Option<String>,
    client: Client,
    session_id: Mutex<Option<String>>,
}

#[derive(Serialize)]
struct RpcRequest<'a, A> {
    method: &'a str,
    arguments: A,
}

#[derive(Deserialize)]
struct RpcResponse<A> {
    result: String,
    arguments: Option<A>,
}

#[derive(Serialize)]
struct TorrentGetArgs {
    fields: &'static [&'static str],
}

const TORRENT_GET_FIELDS: &[&str] = &[
    "id",
    "name",
    "magnetLink",
    "downloadDir",
    "percentDone",
    "status",
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTorrent {
    id: i64,
    name: String,
    #[serde(default)]
    magnet_link: String,
    #[serde(default)]
    download_dir: String,
    #[serde(default)]
    percent_done: f64,
    #[serde(default)]
    status: i64,
}

#[derive(Deserialize)]
struct TorrentGetResult {
    torrents: Vec<WireTorrent>,
}

#[derive(Serialize)]
struct TorrentAddArgs<'a> {
    filename: &'a str,
}

#[derive(Serialize)]
struct TorrentRemoveArgs {
    ids: Vec<i64>,
    #[serde(rename = "delete-local-data")]
    delete_local_data: bool,
}

/// Human-readable name for Transmission's numeric status codes.
fn status_label(code: i64) -> &'static str {
    match code {
        0 => "stopped",
        1 => "queued-to-check",
        2 => "checking",
        3 => "queued-to-download",
        4 => "downloading",
        5 => "queued-to-seed",
        6 => "seeding",
        _ => "unknown",
    }
}

impl TransmissionClient {
    /// Create a client for the given endpoint, e.g. `https://host:443`.
    /// The `/transmission/rpc` path is appended unless already present.
    pub fn new(endpoint: &str, username: Option<String>, password: Option<String>) -> Self {
        let base = endpoint.trim_end_matches('/');
        let rpc_url = if base.ends_with("/transmission/rpc") {
            base.to_string()
        } else {
            format!("{base}/transmission/rpc")
        };

        Self {
            rpc_url,
            username,
            password,
            client: Client::new(),
            session_id: Mutex::new(None),
        }
    }

    async fn send<A: Serialize>(&self, body: &RpcRequest<'_, A>) -> Result<reqwest::Response> {
        let mut request = self.client.post(&self.rpc_url).json(body);
        if let Some(username) = &self.username {
            request = request.basic_auth(username, self.password.as_deref());
        }
        if let Some(session_id) = self.session_id.lock().await.clone() {
            request = request.header(SESSION_ID_HEADER, session_id);
        }
        Ok(request.send().await?)
    }

    /// Execute an RPC call, renegotiating the session id once on 409.
    async fn call<A, R>(&self, method: &str, arguments: A) -> Result<R>
    where
        A: Serialize,
        R: serde::de::DeserializeOwned,
    {
        let body = RpcRequest { method, arguments };

        let mut response = self.send(&body).await?;
        if response.status() == StatusCode::CONFLICT {
            let session_id = response
                .headers()
                .get(SESSION_ID_HEADER)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
                .ok_or_else(|| anyhow!("409 from Transmission without a session id header"))?;
            debug!("renegotiated Transmission session id");
            *self.session_id.lock().await = Some(session_id);
            response = self.send(&body).await?;
        }

        let response = response
            .error_for_status()
            .with_context(|| format!("Transmission RPC '{method}' failed"))?;
        let rpc: RpcResponse<R> = response
            .json()
            .await
            .with_context(|| format!("invalid Transmission RPC response for '{method}'"))?;

        if rpc.result != "success" {
            anyhow::bail!("Transmission RPC '{}' error: {}", method, rpc.result);
        }
        rpc.arguments
            .ok_or_else(|| anyhow!("Transmission RPC '{method}' response missing arguments"))
    }
}

#[async_trait]
impl DownloadClient for TransmissionClient {
    async fn list_tasks(&self) -> Result<Vec<RemoteTask>> {
        let result: TorrentGetResult = self
            .call(
                "torrent-get",
                TorrentGetArgs {
                    fields: TORRENT_GET_FIELDS,
                },
            )
            .await?;

        Ok(result
            .torrents
            .into_iter()
            .map(|torrent| RemoteTask {
                id: torrent.id,
                name: torrent.name,
                magnet_link: torrent.magnet_link,
                download_dir: torrent.download_dir,
                percent_done: torrent.percent_done,
                status: status_label(torrent.status).to_string(),
            })
            .collect())
    }

    async fn add_task(&self, url: &str) -> Result<()> {
        let _: serde_json::Value = self
            .call("torrent-add", TorrentAddArgs { filename: url })
            .await?;
        Ok(())
    }

    async fn remove_task(&self, id: i64, delete_data: bool) -> Result<()> {
        let _: serde_json::Value = self
            .call(
                "torrent-remove",
                TorrentRemoveArgs {
                    ids: vec![id],
                    delete_local_data: delete_data,
                },
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_rpc_url_normalization() {
        let client = TransmissionClient::new("https://example.com", None, None);
        assert_eq!(client.rpc_url, "https://example.com/transmission/rpc");

        let client = TransmissionClient::new("https://example.com/", None, None);
        assert_eq!(client.rpc_url, "https://example.com/transmission/rpc");

        let client = TransmissionClient::new("https://example.com/transmission/rpc", None, None);
        assert_eq!(client.rpc_url, "https://example.com/transmission/rpc");
    }

    #[test]
    fn test_remove_request_body_keeps_local_data() {
        let body = RpcRequest {
            method: "torrent-remove",
            arguments: TorrentRemoveArgs {
                ids: vec![42],
                delete_local_data: false,
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["method"], "torrent-remove");
        assert_eq!(json["arguments"]["ids"], serde_json::json!([42]));
        assert_eq!(json["arguments"]["delete-local-data"], false);
    }

    #[test]
    fn test_add_request_body() {
        let body = RpcRequest {
            method: "torrent-add",
            arguments: TorrentAddArgs {
                filename: "magnet:?xt=urn:btih:abc",
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["arguments"]["filename"], "magnet:?xt=urn:btih:abc");
    }

    #[test]
    fn test_torrent_get_response_parsing() {
        let raw = r#"{
            "result": "success",
            "arguments": {
                "torrents": [
                    {
                        "id": 7,
                        "name": "Some.Show.S01E01",
                        "magnetLink": "magnet:?xt=urn:btih:abc&dn=Some.Show",
                        "downloadDir": "/staging/complete",
                        "percentDone": 1.0,
                        "status": 6
                    }
                ]
            }
        }"#;

        let parsed: RpcResponse<TorrentGetResult> = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.result, "success");
        let torrents = parsed.arguments.unwrap().torrents;
        assert_eq!(torrents.len(), 1);
        assert_eq!(torrents[0].id, 7);
        assert_eq!(torrents[0].download_dir, "/staging/complete");
        assert_eq!(status_label(torrents[0].status), "seeding");
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(status_label(0), "stopped");
        assert_eq!(status_label(4), "downloading");
        assert_eq!(status_label(6), "seeding");
        assert_eq!(status_label(99), "unknown");
    }

    /// Reads one HTTP request off the stream, headers plus body.
    async fn read_http_request(stream: &mut tokio::net::TcpStream) -> String {
        use tokio::io::AsyncReadExt;

        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..pos]).to_lowercase();
                let content_length: usize = head
                    .lines()
                    .find_map(|line| line.strip_prefix("content-length:"))
                    .map(|value| value.trim().parse().unwrap())
                    .unwrap_or(0);
                if buf.len() >= pos + 4 + content_length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    #[tokio::test]
    async fn test_session_id_renegotiated_on_conflict() {
        use std::sync::Arc;

        use parking_lot::Mutex;
        use tokio::io::AsyncWriteExt;
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let seen = requests.clone();
        let server = tokio::spawn(async move {
            // First exchange: refuse and hand out a session id.
            let (mut stream, _) = listener.accept().await.unwrap();
            let request = read_http_request(&mut stream).await;
            seen.lock().push(request);
            stream
                .write_all(
                    b"HTTP/1.1 409 Conflict\r\n\
                      X-Transmission-Session-Id: session-123\r\n\
                      Content-Length: 0\r\n\
                      Connection: close\r\n\r\n",
                )
                .await
                .unwrap();

            // Retried call: answer with an empty torrent list.
            let (mut stream, _) = listener.accept().await.unwrap();
            let request = read_http_request(&mut stream).await;
            seen.lock().push(request);
            let body =r#"{"result":"success","arguments":{"torrents":[]}}"#;
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await.unwrap();
        });

        let client = TransmissionClient::new(&format!("http://{addr}"), None, None);
        let tasks = client.list_tasks().await.unwrap();
        assert!(tasks.is_empty());

        server.await.unwrap();

        let requests = requests.lock();
        assert_eq!(requests.len(), 2);
        let first = requests[0].to_lowercase();
        let second = requests[1].to_lowercase();
        assert!(!first.contains("x-transmission-session-id"));
        assert!(second.contains("x-transmission-session-id: session-123"));

        // The renegotiated id is kept for later calls.
        assert_eq!(
            *client.session_id.lock().await,
            Some("session-123".to_string())
        );
    }
}
