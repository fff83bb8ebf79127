use crate::error::Error;
use crate::identity::Credential;
use crate::Result;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use http::{header::AUTHORIZATION, HeaderValue};
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpSocket;
use tokio::time::Duration;
use tokio_tungstenite::{
    client_async_tls_with_config, tungstenite::client::IntoClientRequest, tungstenite::Message,
    Connector, MaybeTlsStream, WebSocketStream,
};
use tracing::debug;
use url::Url;

/// One unit pushed by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Application payload, expected to hold one location sample
    Payload(String),
    /// Transport-level keep-alive (ping/pong); proves liveness only
    KeepAlive,
    /// Server closed the stream
    Close,
}

/// Stream of frames from one connection
pub type FrameStream = BoxStream<'static, Result<Frame>>;

/// Everything needed to open a stream for one entity
#[derive(Debug, Clone)]
pub struct StreamRequest {
    /// Fully-built stream URL including the entity query
    pub url: Url,
    /// Entity being tracked
    pub entity_id: String,
    /// Credential to attach, if any
    pub credential: Option<Credential>,
}

impl StreamRequest {
    /// Build `{endpoint}{stream_path}?id={entity_id}`.
    ///
    /// `http`/`https` endpoints map to `ws`/`wss`; a path on the endpoint
    /// is kept as a prefix.
    pub fn build(
        endpoint: &str,
        stream_path: &str,
        entity_id: &str,
        credential: Option<Credential>,
    ) -> Result<Self> {
        let invalid = |reason: String| Error::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason,
        };

        let mut url = Url::parse(endpoint).map_err(|e| invalid(e.to_string()))?;
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => return Err(invalid(format!("unsupported scheme '{}'", other))),
        };
        url.set_scheme(scheme)
            .map_err(|_| invalid("cannot switch scheme".to_string()))?;
        if url.host_str().is_none() {
            return Err(invalid("no host".to_string()));
        }

        let path = format!(
            "{}/{}",
            url.path().trim_end_matches('/'),
            stream_path.trim_start_matches('/')
        );
        url.set_path(&path);
        url.set_query(None);
        url.query_pairs_mut().append_pair("id", entity_id);

        Ok(Self {
            url,
            entity_id: entity_id.to_string(),
            credential,
        })
    }
}

/// Opens entity-scoped streams of location frames.
///
/// Implementations only establish connections; the stream worker owns
/// timeouts, retries and ordering.
pub trait StreamTransport: Send + Sync + 'static {
    /// Open a stream for `request`.
    fn connect(&self, request: &StreamRequest) -> impl Future<Output = Result<FrameStream>> + Send;
}

/// WebSocket transport over a direct TCP connection
#[derive(Debug, Clone, Default)]
pub struct WsTransport;

impl WsTransport {
    pub fn new() -> Self {
        Self
    }
}

impl StreamTransport for WsTransport {
    async fn connect(&self, request: &StreamRequest) -> Result<FrameStream> {
        let ws_stream = connect_websocket(request).await?;
        Ok(ws_stream.map(|msg| msg.map(frame_from_message).map_err(Error::from)).boxed())
    }
}

fn frame_from_message(message: Message) -> Frame {
    match message {
        Message::Text(text) => Frame::Payload(text.as_str().to_owned()),
        Message::Binary(data) => Frame::Payload(String::from_utf8_lossy(&data).into_owned()),
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Frame::KeepAlive,
        Message::Close(_) => Frame::Close,
    }
}

/// Type alias for WebSocket stream
type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Connect to the stream URL, attaching the bearer credential if present.
async fn connect_websocket(request: &StreamRequest) -> Result<WsStream> {
    let endpoint = request.url.as_str();
    let failed = |reason: String| Error::ConnectionFailed {
        endpoint: endpoint.to_string(),
        reason,
    };

    let host = request
        .url
        .host_str()
        .ok_or_else(|| failed("No host in URL".to_string()))?;
    let is_tls = request.url.scheme() == "wss";
    let port = request
        .url
        .port_or_known_default()
        .unwrap_or(if is_tls { 443 } else { 80 });

    // Build the WebSocket request
    let mut ws_request = endpoint
        .into_client_request()
        .map_err(|e| failed(format!("Invalid WebSocket request: {}", e)))?;

    if let Some(credential) = &request.credential {
        let value = HeaderValue::from_str(&credential.bearer())
            .map_err(|_| failed("Credential is not a valid header value".to_string()))?;
        ws_request.headers_mut().insert(AUTHORIZATION, value);
    }

    let tcp_stream = connect_direct(host, port).await.map_err(failed)?;
    set_tcp_options(&tcp_stream);

    // TLS connector (if needed)
    let connector = if is_tls {
        let tls = native_tls::TlsConnector::new().map_err(|e| failed(format!("TLS error: {}", e)))?;
        Some(Connector::NativeTls(tls))
    } else {
        None
    };

    debug!("WebSocket handshake with {} (tls={})", host, is_tls);
    let (ws_stream, _response) =
        client_async_tls_with_config(ws_request, tcp_stream, None, connector).await?;

    Ok(ws_stream)
}

/// Resolve and connect a TCP socket
async fn connect_direct(host: &str, port: u16) -> std::result::Result<tokio::net::TcpStream, String> {
    // DNS lookup
    let dest_str = format!("{}:{}", host, port);
    let dest_addr: SocketAddr = tokio::net::lookup_host(&dest_str)
        .await
        .map_err(|e| format!("DNS lookup failed: {}", e))?
        .next()
        .ok_or_else(|| format!("No addresses found for {}", host))?;

    let socket = if dest_addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(|e| format!("Failed to create socket: {}", e))?;

    socket
        .connect(dest_addr)
        .await
        .map_err(|e| format!("TCP connect to {} failed: {}", dest_addr, e))
}

/// Set TCP options for prompt delivery and dead-peer detection
fn set_tcp_options(stream: &tokio::net::TcpStream) {
    let sock2 = socket2::SockRef::from(stream);

    // Samples are small; don't let Nagle hold them back
    let _ = sock2.set_nodelay(true);

    let keepalive = socket2::TcpKeepalive::new()
        .with_time(Duration::from_secs(30))
        .with_interval(Duration::from_secs(10));
    let _ = sock2.set_tcp_keepalive(&keepalive);
}
