//! Connection state machine and listener loop:
//!
//! ```text
//! WAIT_DATA --read chunk--> ACCUMULATE --ends with </known-tag>--> DISPATCHED --write reply--> CLOSE
//!                                │
//!                                └─idle > TIMEOUT──► CLOSE (no reply)
//! ```

use std::sync::Arc;
use std::time::Duration;

use bloomdex_core::IndexStore;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::handlers::{wrap_json_output, HandlerRegistry};
use crate::protocol::{self, parse_frame, TcpMessage};

/// Per-chunk read timeout.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

const READ_CHUNK_SIZE: usize = 8192;
/// Guards against unbounded accumulation from a client that never sends a
/// closing tag; not specified directly, but required so a single connection
/// can't exhaust memory.
const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Accepts connections on `listener` until the returned future is dropped,
/// spawning one task per connection. The only state shared across
/// connections is the index store and the handler registry.
pub async fn serve(listener: TcpListener, registry: Arc<HandlerRegistry>, store: Arc<IndexStore>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "failed to accept connection");
                continue;
            }
        };
        let registry = Arc::clone(&registry);
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            debug!(peer = %peer, "connection accepted");
            handle_connection(stream, registry, store, DEFAULT_READ_TIMEOUT).await;
            debug!(peer = %peer, "connection closed");
        });
    }
}

/// Drives one connection through the state machine above.
pub async fn handle_connection(
    mut stream: TcpStream,
    registry: Arc<HandlerRegistry>,
    store: Arc<IndexStore>,
    read_timeout: Duration,
) {
    let known_classes = registry.known_classes();
    let mut buf = Vec::new();
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];

    let class = loop {
        let read_result = tokio::time::timeout(read_timeout, stream.read(&mut chunk)).await;
        let n = match read_result {
            Err(_elapsed) => {
                debug!("read timeout, closing connection silently");
                return;
            }
            Ok(Err(e)) => {
                debug!(error = %e, "read error, closing connection silently");
                return;
            }
            Ok(Ok(0)) => {
                debug!("connection closed before a closing tag was observed");
                return;
            }
            Ok(Ok(n)) => n,
        };

        buf.extend_from_slice(&chunk[..n]);
        if buf.len() > MAX_FRAME_BYTES {
            warn!("frame exceeded maximum size, closing connection silently");
            return;
        }

        let text = String::from_utf8_lossy(&buf);
        if let Some(tag) = protocol::trailing_tag(&text) {
            if !known_classes.iter().any(|c| *c == tag) {
                warn!(class = tag.as_str(), "unknown message class, closing connection silently");
                return;
            }
            break tag;
        }
    };

    let text = String::from_utf8_lossy(&buf).into_owned();
    let message = match parse_frame(&text, &class) {
        Ok(m) => m,
        Err(e) => {
            warn!(error = %e, "xml parse error, closing connection silently");
            return;
        }
    };

    dispatch_and_reply(&mut stream, &registry, &store, message).await;
}

async fn dispatch_and_reply(
    stream: &mut TcpStream,
    registry: &HandlerRegistry,
    store: &IndexStore,
    message: TcpMessage,
) {
    let Some(handler) = registry.get(&message.class) else {
        // Registered-at-parse-time class disappeared between `known_classes()`
        // and `get()` — unreachable given the registry is immutable after
        // startup, but handled for defense in depth.
        warn!(class = message.class.as_str(), "no handler registered for class");
        return;
    };

    let decoded = match message.decoded_payload() {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "failed to decode payload, closing connection silently");
            return;
        }
    };

    // JSON decodability is a property of the frame itself, checked here
    // before any handler runs — a payload that isn't valid JSON never
    // reaches a handler's own field validation, and gets the same silent
    // close as any other malformed frame. A handler's own
    // "Invalid search_input"-style reply is reserved for a value that
    // parsed fine but is missing required fields.
    if message.format == protocol::Format::Json {
        if let Err(e) = serde_json::from_str::<serde_json::Value>(&decoded) {
            warn!(error = %e, "payload is not valid json, closing connection silently");
            return;
        }
    }

    let result = handler.handle(&decoded, store).await;
    let wrapped = wrap_json_output(result);
    let reply_json = serde_json::to_string(&wrapped).unwrap_or_else(|_| "{}".to_string());
    let reply_frame = TcpMessage::encode_reply(&message.class, &reply_json);

    if let Err(e) = stream.write_all(reply_frame.as_bytes()).await {
        warn!(error = %e, "failed to write reply, connection aborted");
        return;
    }
    if let Err(e) = stream.shutdown().await {
        debug!(error = %e, "error shutting down connection stream");
    }
}

/// Binds and logs the listening address.
pub async fn bind(host: &str, port: u16) -> std::io::Result<TcpListener> {
    let listener = TcpListener::bind((host, port)).await?;
    let local = listener.local_addr()?;
    info!(addr = %local, "listening");
    Ok(listener)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::default_registry;
    use tokio::io::AsyncWriteExt as _;

    async fn spawn_test_server() -> (std::net::SocketAddr, Arc<IndexStore>) {
        let listener = bind("127.0.0.1", 0).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let store = Arc::new(IndexStore::new());
        let registry = Arc::new(default_registry());
        let store_clone = Arc::clone(&store);
        tokio::spawn(async move { serve(listener, registry, store_clone).await });
        (addr, store)
    }

    #[tokio::test]
    async fn ping_round_trip() {
        let (addr, _store) = spawn_test_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(br#"<ping format="text"></ping>"#).await.unwrap();

        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains(r#""response":"alive""#), "got: {text}");
    }

    #[tokio::test]
    async fn s6_malformed_frame_closes_without_reply() {
        let (addr, _store) = spawn_test_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(br#"<search format="json">{not json</search>"#).await.unwrap();

        let mut buf = Vec::new();
        let n = stream.read_to_end(&mut buf).await.unwrap();
        assert_eq!(n, 0, "server must not reply to a malformed frame");
    }

    #[tokio::test]
    async fn unknown_class_closes_without_reply() {
        let (addr, _store) = spawn_test_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(br#"<evil format="text">oops</evil>"#).await.unwrap();

        let mut buf = Vec::new();
        let n = stream.read_to_end(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn search_validation_error_still_replies_json() {
        let (addr, _store) = spawn_test_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(br#"<search format="json">{}</search>"#).await.unwrap();

        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("Invalid search_input"), "got: {text}");
    }
}
