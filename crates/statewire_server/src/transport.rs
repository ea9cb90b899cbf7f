//! WebSocket transport.

use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::error::{GatewayError, ServerResult};
use crate::gateway::Gateway;
use crate::handler::HandlerResolver;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use statewire_engine::{ContextGuard, ContextRegistry};
use statewire_protocol::{ErrorCode, ServerMessage};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Renders the initial page for a new session.
///
/// Called once per page load with a freshly created, bound session; the
/// renderer creates the session's cells and components and returns the
/// page that will connect back to `ws_path`.
pub trait PageRenderer: Send + Sync {
    /// Returns the page HTML.
    fn render_page(&self, context: &mut ContextGuard, ws_path: &str) -> String;
}

#[derive(Clone)]
struct AppState {
    gateway: Arc<Gateway>,
    page: Option<Arc<dyn PageRenderer>>,
    ws_path: Arc<str>,
    max_message_bytes: usize,
    outbound_buffer: usize,
}

/// A WebSocket server in front of a [`Gateway`].
///
/// Each connection is served by one task that reads a frame, hands it to the
/// gateway on the blocking pool, queues the replies, and only then reads the
/// next frame. A separate writer task drains the queue onto the socket.
pub struct LiveServer {
    config: ServerConfig,
    gateway: Arc<Gateway>,
    page: Option<Arc<dyn PageRenderer>>,
}

impl LiveServer {
    /// Creates a server with its own session registry.
    pub fn new(config: ServerConfig, handlers: Arc<dyn HandlerResolver>) -> Self {
        let registry = Arc::new(ContextRegistry::new(config.registry.clone()));
        Self::with_registry(config, registry, handlers)
    }

    /// Creates a server over an existing session registry.
    pub fn with_registry(
        config: ServerConfig,
        registry: Arc<ContextRegistry>,
        handlers: Arc<dyn HandlerResolver>,
    ) -> Self {
        Self {
            config,
            gateway: Arc::new(Gateway::new(registry, handlers)),
            page: None,
        }
    }

    /// Serves `page` at `/`.
    pub fn with_page<P>(mut self, page: P) -> Self
    where
        P: PageRenderer + 'static,
    {
        self.page = Some(Arc::new(page));
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns the gateway.
    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    /// Builds the router.
    pub fn router(&self) -> Router {
        let state = AppState {
            gateway: Arc::clone(&self.gateway),
            page: self.page.clone(),
            ws_path: Arc::from(self.config.ws_path.as_str()),
            max_message_bytes: self.config.max_message_bytes,
            outbound_buffer: self.config.outbound_buffer.max(1),
        };
        let mut router = Router::new().route(&self.config.ws_path, get(ws_handler));
        if self.page.is_some() {
            router = router.route("/", get(page_handler));
        }
        router.with_state(state)
    }

    /// Runs until the listener fails.
    pub async fn serve(self) -> ServerResult<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Runs until `shutdown` completes.
    ///
    /// The TTL sweeper runs for as long as the server does.
    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let sweeper = self.gateway.registry().spawn_sweeper()?;
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        info!(
            addr = %listener.local_addr()?,
            ws_path = %self.config.ws_path,
            ttl_secs = self.config.registry.ttl.as_secs(),
            "live server listening"
        );

        let result = axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await;
        sweeper.shutdown().await;
        info!("live server stopped");
        result?;
        Ok(())
    }
}

async fn page_handler(State(state): State<AppState>) -> Response {
    let Some(page) = state.page.clone() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let gateway = Arc::clone(&state.gateway);
    let ws_path = Arc::clone(&state.ws_path);

    let rendered = tokio::task::spawn_blocking(move || {
        let mut context = gateway.registry().create();
        debug!(session_id = %context.session_id(), "page session created");
        page.render_page(&mut context, &ws_path)
    })
    .await;

    match rendered {
        Ok(html) => Html(html).into_response(),
        Err(err) => {
            error!(error = %err, "page render failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.max_message_size(state.max_message_bytes)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

/// Opens a connection and queues its `connected` message.
///
/// Returns `None`, with the connection already closed, when the writer has
/// gone away.
async fn announce(gateway: &Gateway, tx: &mpsc::Sender<ServerMessage>) -> Option<Connection> {
    let (mut connection, connected) = gateway.open();
    if tx.send(connected).await.is_err() {
        warn!(connection = %connection.id(), "writer gone before connected was sent");
        gateway.close(&mut connection);
        return None;
    }
    info!(connection = %connection.id(), "websocket connected");
    Some(connection)
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(state.outbound_buffer);

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match message.encode() {
                Ok(text) => text,
                Err(err) => {
                    error!(error = %err, "failed to encode message");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                debug!("socket send failed, client disconnected");
                break;
            }
        }
    });

    let gateway = Arc::clone(&state.gateway);
    let Some(connection) = announce(&gateway, &tx).await else {
        drop(tx);
        let _ = writer.await;
        return;
    };
    let connection_id = connection.id();
    let mut slot = Some(connection);

    'frames: while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(_)) => {
                let reply =
                    ServerMessage::error(ErrorCode::Protocol, "binary frames are not supported");
                if tx.send(reply).await.is_err() {
                    break;
                }
                continue;
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                let err = GatewayError::Transport(err.to_string());
                warn!(connection = %connection_id, error = %err, "websocket error");
                break;
            }
        };

        let Some(mut connection) = slot.take() else {
            break;
        };
        let handler = Arc::clone(&gateway);
        let handled = tokio::task::spawn_blocking(move || {
            let replies = handler.handle_text(&mut connection, &text);
            (connection, replies)
        })
        .await;

        match handled {
            Ok((connection, replies)) => {
                slot = Some(connection);
                for reply in replies {
                    if tx.send(reply).await.is_err() {
                        break 'frames;
                    }
                }
            }
            Err(err) => {
                error!(connection = %connection_id, error = %err, "message task failed");
                break;
            }
        }
    }

    match slot.as_mut() {
        Some(connection) => gateway.close(connection),
        None => gateway.close_orphan(connection_id),
    }
    drop(tx);
    let _ = writer.await;
    info!(connection = %connection_id, "websocket closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HandlerRegistry;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::json;
    use statewire_engine::{CellStore, RegistryConfig};
    use statewire_protocol::{CellValue, ClientMessage, EventMessage, InitMessage};
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::time::timeout;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
    use tower::ServiceExt;

    type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

    const WAIT: Duration = Duration::from_secs(5);

    struct CounterPage;

    impl PageRenderer for CounterPage {
        fn render_page(&self, context: &mut ContextGuard, ws_path: &str) -> String {
            context.create_named_cell("count", 0).unwrap();
            format!(
                "<body data-session=\"{}\" data-ws=\"{ws_path}\"></body>",
                context.session_id()
            )
        }
    }

    fn server() -> (LiveServer, Arc<HandlerRegistry>) {
        let config = ServerConfig::default().with_registry(RegistryConfig::default());
        let registry = Arc::new(ContextRegistry::new(config.registry.clone()));
        let handlers = Arc::new(HandlerRegistry::new());
        let server = LiveServer::with_registry(
            config,
            registry,
            Arc::clone(&handlers) as Arc<dyn HandlerResolver>,
        );
        (server, handlers)
    }

    async fn spawn(server: &LiveServer) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = server.router();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    async fn connect(addr: SocketAddr) -> Client {
        let (client, _) = timeout(WAIT, connect_async(format!("ws://{addr}/ws")))
            .await
            .unwrap()
            .unwrap();
        client
    }

    async fn next_message(client: &mut Client) -> ServerMessage {
        loop {
            let frame = timeout(WAIT, client.next()).await.unwrap().unwrap().unwrap();
            if let WsMessage::Text(text) = frame {
                return ServerMessage::decode(&text).unwrap();
            }
        }
    }

    async fn send(client: &mut Client, message: ClientMessage) {
        let text = message.encode().unwrap();
        client.send(WsMessage::Text(text)).await.unwrap();
    }

    async fn wait_until(mut done: impl FnMut() -> bool) {
        timeout(WAIT, async {
            while !done() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn connected_then_init_and_event() {
        let (server, handlers) = server();
        {
            let mut ctx = server.gateway().registry().create_with_id("ctx_1").unwrap();
            ctx.create_named_cell("count", 0).unwrap();
            ctx.register_component("counter", |cells: &CellStore| {
                let count = cells.get("count").and_then(|v| v.as_i64()).unwrap_or(0);
                format!("<span>{count}</span>")
            });
        }
        handlers.register("increment", |_, scope| {
            scope
                .require_context()?
                .update("count", |v| v.as_i64().unwrap_or(0) + 1)?;
            Ok(())
        });
        let addr = spawn(&server).await;
        let mut client = connect(addr).await;

        assert_eq!(next_message(&mut client).await.type_name(), "connected");

        send(&mut client, ClientMessage::Init(InitMessage::new("ctx_1"))).await;
        assert_eq!(
            next_message(&mut client).await,
            ServerMessage::InitState {
                cells: vec![CellValue::new("count", json!(0))]
            }
        );

        let event = EventMessage::new("increment", "click").with_context("ctx_1");
        send(&mut client, ClientMessage::Event(event)).await;
        assert_eq!(
            next_message(&mut client).await,
            ServerMessage::StateUpdate {
                cells: vec![CellValue::new("count", json!(1))]
            }
        );
        assert_eq!(next_message(&mut client).await.type_name(), "domUpdate");
        assert_eq!(next_message(&mut client).await.type_name(), "eventHandled");
    }

    #[tokio::test]
    async fn binary_frame_gets_protocol_error() {
        let (server, _) = server();
        let addr = spawn(&server).await;
        let mut client = connect(addr).await;
        next_message(&mut client).await;

        client.send(WsMessage::Binary(vec![1, 2, 3])).await.unwrap();
        match next_message(&mut client).await {
            ServerMessage::Error { code, .. } => assert_eq!(code, ErrorCode::Protocol),
            other => panic!("expected error, got {other:?}"),
        }

        send(&mut client, ClientMessage::Ping).await;
        assert_eq!(next_message(&mut client).await, ServerMessage::Pong);
    }

    #[tokio::test]
    async fn close_keeps_session() {
        let (server, _) = server();
        server
            .gateway()
            .registry()
            .create_with_id("ctx_1")
            .unwrap()
            .create_named_cell("count", 3)
            .unwrap();
        let addr = spawn(&server).await;
        let mut client = connect(addr).await;
        next_message(&mut client).await;
        send(&mut client, ClientMessage::Init(InitMessage::new("ctx_1"))).await;
        next_message(&mut client).await;
        assert_eq!(server.gateway().connections_for("ctx_1").len(), 1);

        client.close(None).await.unwrap();
        let gateway = Arc::clone(server.gateway());
        wait_until(|| gateway.stats().connections_closed == 1).await;

        assert!(gateway.connections_for("ctx_1").is_empty());
        assert!(gateway.registry().contains("ctx_1"));
        let ctx = gateway.registry().bind("ctx_1").unwrap();
        assert_eq!(ctx.get("count"), Some(&json!(3)));
    }

    #[tokio::test]
    async fn page_creates_session_and_renders() {
        let (server, _) = server();
        let server = server.with_page(CounterPage);

        let response = server
            .router()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains("data-ws=\"/ws\""));

        let registry = server.gateway().registry();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.stats().created, 1);
    }

    #[tokio::test]
    async fn no_page_means_not_found() {
        let (server, _) = server();

        let response = server
            .router()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(server.gateway().registry().is_empty());
    }

    #[tokio::test]
    async fn announce_closes_when_writer_is_gone() {
        let (server, _) = server();
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        assert!(announce(server.gateway(), &tx).await.is_none());

        let stats = server.gateway().stats();
        assert_eq!(stats.connections_opened, 1);
        assert_eq!(stats.connections_closed, 1);
    }
}
