use futures_util::SinkExt;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{json, Value};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// ============================================================
/// BusConfig
/// ============================================================
///
/// Connection settings for the message bus, read from the
/// environment by collectors (never by the scheduling core).
///
/// VARIABLES:
/// - COLLECTOR_BUS_URL   WebSocket endpoint (ws:// or wss://)
/// - COLLECTOR_BUS_USER  login user
/// - COLLECTOR_BUS_PASS  login password
/// - COLLECTOR_BUS_DEMO  "1" / "true" → print frames, send nothing
///
/// A missing URL also selects demo mode.
#[derive(Clone, Default)]
pub struct BusConfig {
    pub url: Option<String>,
    pub user: Option<String>,
    pub pass: Option<String>,
    pub demo: bool,
}

impl BusConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| get(key).filter(|v| !v.is_empty());

        Self {
            url: non_empty("COLLECTOR_BUS_URL"),
            user: non_empty("COLLECTOR_BUS_USER"),
            pass: non_empty("COLLECTOR_BUS_PASS"),
            demo: non_empty("COLLECTOR_BUS_DEMO")
                .is_some_and(|v| matches!(v.as_str(), "1" | "true" | "yes")),
        }
    }

    fn is_demo(&self) -> bool {
        self.demo || self.url.is_none()
    }
}

impl std::fmt::Debug for BusConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusConfig")
            .field("url", &self.url)
            .field("user", &self.user)
            .field("pass", &self.pass.as_ref().map(|_| "***"))
            .field("demo", &self.demo)
            .finish()
    }
}

/// ============================================================
/// BusClient
/// ============================================================
///
/// A **short-lived** connection to the message bus.
///
/// Each job invocation obtains its own client, publishes, and
/// closes it. Clients are never pooled or shared across firings,
/// so overlapping invocations of the same collector never contend
/// on a connection.
///
/// Wire protocol (JSON text frames):
/// - login:   {"op":"login","client_id":..,"user":..,"pass":..}
/// - publish: {"op":"publish","topic":..,"payload":..}
///
/// DEMO MODE:
/// - No network connection
/// - Publish frames are printed to stdout
pub struct BusClient {
    client_id: String,
    ws: Option<WsStream>,
}

impl BusClient {
    /// Connects using the environment configuration.
    pub async fn connect(client_id: &str) -> Result<Self> {
        Self::connect_with(&BusConfig::from_env(), client_id).await
    }

    /// Connects and performs the login handshake.
    ///
    /// In demo mode this never fails and opens no socket.
    pub async fn connect_with(cfg: &BusConfig, client_id: &str) -> Result<Self> {
        let url = match cfg.url.as_deref() {
            Some(url) if !cfg.is_demo() => url,
            _ => {
                log::debug!("bus client '{}' running in DEMO mode", client_id);
                return Ok(Self {
                    client_id: client_id.to_string(),
                    ws: None,
                });
            }
        };

        let (mut ws, _) = connect_async(url)
            .await
            .with_context(|| format!("failed to connect to bus at {url}"))?;

        // ------------------------------------------------------------
        // LOGIN HANDSHAKE
        // ------------------------------------------------------------
        let login = login_frame(client_id, cfg);
        ws.send(Message::Text(login.to_string().into()))
            .await
            .context("failed to send bus login")?;
        log::debug!("bus client '{}' logged in to {}", client_id, url);

        Ok(Self {
            client_id: client_id.to_string(),
            ws: Some(ws),
        })
    }

    /// Publishes one JSON payload on `topic`.
    pub async fn publish<T: Serialize>(&mut self, topic: &str, payload: &T) -> Result<()> {
        let frame = publish_frame(topic, serde_json::to_value(payload)?);

        match self.ws.as_mut() {
            Some(ws) => {
                ws.send(Message::Text(frame.to_string().into()))
                    .await
                    .with_context(|| format!("failed to publish on {topic}"))?;
                log::debug!("[{}] published on {}", self.client_id, topic);
            }
            None => println!("DEMO → {}", frame),
        }

        Ok(())
    }

    /// Closes the connection. A close failure is only logged:
    /// everything has already been sent at this point.
    pub async fn close(mut self) {
        if let Some(mut ws) = self.ws.take() {
            if let Err(e) = ws.close(None).await {
                log::debug!("[{}] bus close failed: {}", self.client_id, e);
            }
        }
    }
}

fn login_frame(client_id: &str, cfg: &BusConfig) -> Value {
    json!({
        "op": "login",
        "client_id": client_id,
        "user": cfg.user,
        "pass": cfg.pass,
    })
}

fn publish_frame(topic: &str, payload: Value) -> Value {
    json!({
        "op": "publish",
        "topic": topic,
        "payload": payload,
    })
}
