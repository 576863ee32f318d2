use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use profilematch_logging::{pm_debug, pm_info};

use crate::{ChannelSettings, TransportError};

/// One live connection to a job's progress stream.
#[async_trait::async_trait]
pub trait Transport: Send {
    /// Next text frame, or `None` once the peer has closed the stream.
    async fn recv(&mut self) -> Option<Result<String, TransportError>>;

    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Best-effort graceful shutdown.
    async fn close(&mut self);
}

/// Opens transports for a job id.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, job_id: &str) -> Result<Box<dyn Transport>, TransportError>;
}

/// Progress stream URL for a job: `{ws(s)://host}/ws/analysis/{job_id}/`.
///
/// `http` maps to `ws` and `https` to `wss`; WebSocket URLs are used as given.
pub fn ws_endpoint(server_url: &str, job_id: &str) -> Result<Url, TransportError> {
    let mut url =
        Url::parse(server_url).map_err(|err| TransportError::Endpoint(err.to_string()))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(TransportError::Endpoint(format!(
                "unsupported scheme {other:?}"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| TransportError::Endpoint(format!("cannot use scheme {scheme}")))?;
    url.set_query(None);
    url.set_fragment(None);
    url.path_segments_mut()
        .map_err(|()| TransportError::Endpoint("server url cannot be a base".into()))?
        .pop_if_empty()
        .extend(["ws", "analysis", job_id, ""]);
    Ok(url)
}

#[derive(Debug, Clone)]
pub struct WsConnector {
    server_url: String,
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(settings: &ChannelSettings) -> Result<Self, TransportError> {
        // Validate once up front so a bad config fails at construction.
        ws_endpoint(&settings.server_url, "probe")?;
        Ok(Self {
            server_url: settings.server_url.clone(),
            connect_timeout: settings.connect_timeout,
        })
    }
}

#[async_trait::async_trait]
impl Connector for WsConnector {
    async fn connect(&self, job_id: &str) -> Result<Box<dyn Transport>, TransportError> {
        let url = ws_endpoint(&self.server_url, job_id)?;
        pm_info!("Connecting progress stream url={}", url);
        let handshake = tokio_tungstenite::connect_async(url.as_str());
        let (stream, _response) = tokio::time::timeout(self.connect_timeout, handshake)
            .await
            .map_err(|_| TransportError::Timeout(self.connect_timeout))?
            .map_err(|err| TransportError::Connect(err.to_string()))?;
        Ok(Box::new(WsTransport { stream }))
    }
}

struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait::async_trait]
impl Transport for WsTransport {
    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => pm_debug!("Skipping non-UTF-8 binary frame"),
                },
                Ok(Message::Close(frame)) => {
                    pm_debug!("Server closed progress stream: {:?}", frame);
                    return None;
                }
                // Ping/pong are answered by tungstenite itself.
                Ok(_) => {}
                Err(err) => return Some(Err(TransportError::Stream(err.to_string()))),
            }
        }
    }

    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::text(text))
            .await
            .map_err(|err| TransportError::Stream(err.to_string()))
    }

    async fn close(&mut self) {
        if let Err(err) = self.stream.close(None).await {
            pm_debug!("Ignoring error while closing progress stream: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_urls_map_to_ws_endpoints() {
        let url = ws_endpoint("http://localhost:8000", "abc-123").unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8000/ws/analysis/abc-123/");

        let url = ws_endpoint("https://match.example.com/", "42").unwrap();
        assert_eq!(url.as_str(), "wss://match.example.com/ws/analysis/42/");
    }

    #[test]
    fn base_paths_are_kept_and_ids_escaped() {
        let url = ws_endpoint("https://example.com/backend?x=1", "a/b").unwrap();
        assert_eq!(url.as_str(), "wss://example.com/backend/ws/analysis/a%2Fb/");
    }

    #[test]
    fn rejects_unusable_server_urls() {
        assert!(matches!(
            ws_endpoint("ftp://example.com", "1"),
            Err(TransportError::Endpoint(_))
        ));
        assert!(matches!(
            ws_endpoint("not a url", "1"),
            Err(TransportError::Endpoint(_))
        ));
    }
}
