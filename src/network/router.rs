//! Protocol Router
//!
//! Maps one classified request onto exactly one registry operation and
//! formats the result in the protocol family the request arrived in.
//!
//! The registry sits behind a single mutex. Every command takes the lock once
//! and performs its whole operation (including auto-start, winner and
//! liveness checks) before releasing it, so registry operations form a total
//! order. No I/O happens while the lock is held.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::game::registry::Registry;
use crate::network::http::{self, HttpResponse, StaticFiles};
use crate::network::protocol::{
    GameCommand, GameOverBody, HttpRequest, ProtocolError, ReadyBody, Request, ServerMessage,
    UpdateBody, LINE_TERMINATOR,
};

/// A formatted reply, tagged with the protocol family it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// JSON body, sent with the line terminator.
    Line(ServerMessage),
    /// Complete HTTP response, sent as-is.
    Http(HttpResponse),
}

impl Reply {
    /// Encode for the wire.
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Reply::Line(message) => {
                let mut bytes = match message.to_json() {
                    Ok(text) => text.into_bytes(),
                    Err(e) => {
                        error!("Failed to serialize reply: {}", e);
                        br#"{"status":"ERROR","message":"internal error"}"#.to_vec()
                    }
                };
                bytes.extend_from_slice(LINE_TERMINATOR);
                bytes
            }
            Reply::Http(response) => response.to_bytes(Utc::now()),
        }
    }
}

/// Endpoint resolved from an HTTP request.
#[derive(Debug, Clone, PartialEq)]
enum HttpRoute {
    Game(GameCommand),
    Index,
    Static(String),
    NotFound,
    MethodNotSupported,
}

fn route(req: &HttpRequest) -> Result<HttpRoute, ProtocolError> {
    let route = match (req.method.as_str(), req.path.as_str()) {
        ("POST", "/register") => HttpRoute::Game(GameCommand::Register),
        ("POST", "/ready") => {
            let body: ReadyBody = serde_json::from_str(&req.body)?;
            HttpRoute::Game(GameCommand::SetReady { player_id: body.player_id })
        }
        ("POST", "/update") => {
            let body: UpdateBody = serde_json::from_str(&req.body)?;
            HttpRoute::Game(body.into())
        }
        ("POST", "/gameover") => {
            let body: GameOverBody = serde_json::from_str(&req.body)?;
            HttpRoute::Game(GameCommand::GameOver { player_id: body.player_id, score: body.score })
        }
        ("GET", "/gamestate") => {
            let raw = req
                .query_param("player_id")
                .ok_or(ProtocolError::MissingParameter("player_id"))?;
            HttpRoute::Game(GameCommand::GetGameState { player_id: raw.parse()? })
        }
        ("GET", "/") => HttpRoute::Index,
        ("GET", path) => HttpRoute::Static(path.to_string()),
        ("POST", _) => HttpRoute::NotFound,
        _ => HttpRoute::MethodNotSupported,
    };
    Ok(route)
}

/// Dispatches requests to the shared registry.
#[derive(Debug)]
pub struct Router {
    registry: Mutex<Registry>,
    static_files: Option<StaticFiles>,
    request_count: AtomicU64,
}

impl Router {
    /// Create a router over `registry`, optionally serving files from `static_root`.
    pub fn new(registry: Registry, static_root: Option<PathBuf>) -> Self {
        Self {
            registry: Mutex::new(registry),
            static_files: static_root.map(StaticFiles::new),
            request_count: AtomicU64::new(0),
        }
    }

    /// Handle one raw request.
    pub async fn handle(&self, raw: &str) -> Reply {
        self.request_count.fetch_add(1, Ordering::Relaxed);

        match Request::parse(raw) {
            Request::Line(Ok(command)) => Reply::Line(self.execute(command).await),
            Request::Line(Err(e)) => {
                debug!("Rejected line command {:?}: {}", raw.trim(), e);
                Reply::Line(ServerMessage::error(e.to_string()))
            }
            Request::Http(Ok(req)) => Reply::Http(self.handle_http(&req).await),
            Request::Http(Err(e)) => {
                debug!("Rejected HTTP request: {}", e);
                Reply::Http(HttpResponse::error(400, e.to_string()))
            }
        }
    }

    async fn handle_http(&self, req: &HttpRequest) -> HttpResponse {
        let route = match route(req) {
            Ok(route) => route,
            Err(e) => {
                debug!("Bad {} {}: {}", req.method, req.path, e);
                return HttpResponse::error(400, e.to_string());
            }
        };

        match route {
            HttpRoute::Game(command) => {
                let message = self.execute(command).await;
                let status = if message.is_ok() { 200 } else { 500 };
                HttpResponse::json(status, &message)
            }
            HttpRoute::Index => http::index(),
            HttpRoute::Static(path) => match &self.static_files {
                Some(files) => files.serve(&path).await,
                None => HttpResponse::error(404, "Not found"),
            },
            HttpRoute::NotFound => HttpResponse::error(404, "Not found"),
            HttpRoute::MethodNotSupported => {
                HttpResponse::error(400, format!("Unsupported method {}", req.method))
            }
        }
    }

    /// Run one command inside the registry's critical section.
    pub async fn execute(&self, command: GameCommand) -> ServerMessage {
        let mut registry = self.registry.lock().await;
        // Sampled inside the critical section so timestamps follow lock order.
        let now = Instant::now();

        let result = match command {
            GameCommand::Register => {
                return ServerMessage::Registered { player_id: registry.register(now) };
            }
            GameCommand::SetReady { player_id } => {
                registry.set_ready(player_id, now);
                Ok(ServerMessage::Ack)
            }
            GameCommand::UpdatePlayer { player_id, update } => {
                registry.update_state(player_id, &update, now);
                Ok(ServerMessage::Ack)
            }
            GameCommand::GameOver { player_id, score } => registry
                .report_game_over(player_id, score, now)
                .map(|()| ServerMessage::Ack),
            GameCommand::GetGameState { player_id } => {
                registry.snapshot(player_id, now).map(ServerMessage::State)
            }
        };

        result.unwrap_or_else(|e| {
            error!("Registry fault: {}", e);
            ServerMessage::error("internal error")
        })
    }

    /// Number of registered players.
    pub async fn player_count(&self) -> usize {
        self.registry.lock().await.player_count()
    }

    /// Requests handled since startup.
    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::sync::Arc;

    fn router() -> Router {
        Router::new(Registry::default(), None)
    }

    async fn line(router: &Router, raw: &str) -> Value {
        match router.handle(raw).await {
            Reply::Line(message) => message.to_value().unwrap(),
            other => panic!("expected line reply, got {:?}", other),
        }
    }

    async fn http(router: &Router, raw: &str) -> (u16, Value) {
        match router.handle(raw).await {
            Reply::Http(response) => {
                let body = serde_json::from_slice(&response.body).unwrap_or(Value::Null);
                (response.status, body)
            }
            other => panic!("expected HTTP reply, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_line_lobby_to_start() {
        let router = router();
        assert_eq!(line(&router, "register\n").await["player_id"], "1");
        assert_eq!(line(&router, "register\n").await["player_id"], "2");
        assert_eq!(line(&router, "set_ready 1\n").await["status"], "OK");
        assert_eq!(line(&router, "set_ready 2\n").await["status"], "OK");

        let state = line(&router, "get_game_state 1\n").await;
        assert_eq!(state["game_started"], true);
        assert_eq!(state["all_players"]["1"]["state"], "playing");
        assert_eq!(state["all_players"]["2"]["state"], "playing");
    }

    #[tokio::test]
    async fn test_line_winner_flow() {
        let router = router();
        for raw in ["register", "register", "set_ready 1", "set_ready 2"] {
            line(&router, raw).await;
        }

        line(&router, "game_over 1 50").await;
        assert!(line(&router, "get_game_state 1").await["winner"].is_null());

        line(&router, "game_over 2 30").await;
        let state = line(&router, "get_game_state 2").await;
        assert_eq!(state["winner"]["id"], "1");
        assert_eq!(state["winner"]["score"], 50);
    }

    #[tokio::test]
    async fn test_line_malformed_update_is_error_payload() {
        let router = router();
        let reply = line(&router, "update_player 1 notanumber\n").await;
        assert_eq!(reply["status"], "ERROR");
        assert!(reply["message"].as_str().unwrap().contains("update_player"));
    }

    #[tokio::test]
    async fn test_line_unknown_player_is_ok() {
        let router = router();
        assert_eq!(line(&router, "set_ready 7").await["status"], "OK");
        assert_eq!(line(&router, "update_player 7 1 2 true false 3").await["status"], "OK");
        assert_eq!(line(&router, "game_over 7 3").await["status"], "OK");
        assert_eq!(router.player_count().await, 0);
    }

    #[tokio::test]
    async fn test_line_reply_terminator() {
        let router = router();
        let bytes = router.handle("register\n").await.into_bytes();
        assert!(bytes.ends_with(b"\r\n\r\n"));
        assert!(bytes.starts_with(b"{"));
    }

    #[tokio::test]
    async fn test_http_full_flow() {
        let router = router();
        let (status, body) = http(&router, "POST /register HTTP/1.1\r\n\r\n").await;
        assert_eq!(status, 200);
        assert_eq!(body["player_id"], "1");
        http(&router, "POST /register HTTP/1.1\r\n\r\n").await;

        for id in [1, 2] {
            let body = format!("{{\"player_id\":{}}}", id);
            let raw = format!("POST /ready HTTP/1.1\r\nContent-Length: {}\r\n\r\n{}", body.len(), body);
            assert_eq!(http(&router, &raw).await.0, 200);
        }

        let update = r#"{"player_id":"1","x":100,"y":440.0,"is_jumping":true,"is_ducking":false,"score":12}"#;
        let raw = format!("POST /update HTTP/1.1\r\nContent-Length: {}\r\n\r\n{}", update.len(), update);
        assert_eq!(http(&router, &raw).await.0, 200);

        let (status, state) = http(&router, "GET /gamestate?player_id=1 HTTP/1.1\r\n\r\n").await;
        assert_eq!(status, 200);
        assert_eq!(state["game_started"], true);
        assert_eq!(state["all_players"]["1"]["score"], 12);
        assert_eq!(state["all_players"]["1"]["is_jumping"], true);

        let over = r#"{"player_id":1,"score":40}"#;
        let raw = format!("POST /gameover HTTP/1.1\r\nContent-Length: {}\r\n\r\n{}", over.len(), over);
        assert_eq!(http(&router, &raw).await.0, 200);
    }

    #[tokio::test]
    async fn test_http_errors() {
        let router = router();

        let (status, body) = http(&router, "POST /nowhere HTTP/1.1\r\n\r\n").await;
        assert_eq!(status, 404);
        assert_eq!(body["status"], "ERROR");

        let (status, _) = http(&router, "GET /gamestate HTTP/1.1\r\n\r\n").await;
        assert_eq!(status, 400);

        let (status, _) = http(&router, "POST /ready HTTP/1.1\r\nContent-Length: 5\r\n\r\n{oops").await;
        assert_eq!(status, 400);

        let (status, _) = http(&router, "DELETE /register HTTP/1.1\r\n\r\n").await;
        assert_eq!(status, 400);

        let (status, _) = http(&router, "GET /favicon.ico HTTP/1.1\r\n\r\n").await;
        assert_eq!(status, 404);
    }

    #[tokio::test]
    async fn test_http_index() {
        let router = router();
        match router.handle("GET / HTTP/1.0\r\n\r\n").await {
            Reply::Http(response) => {
                assert_eq!(response.status, 200);
                assert!(!response.body.is_empty());
            }
            other => panic!("expected HTTP reply, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_protocols_share_registry() {
        let router = router();
        line(&router, "register").await;
        let (_, body) = http(&router, "POST /register HTTP/1.1\r\n\r\n").await;
        assert_eq!(body["player_id"], "2");
        assert_eq!(router.request_count(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_registrations_are_unique() {
        let router = Arc::new(router());
        let mut handles = Vec::new();
        for _ in 0..32 {
            let router = router.clone();
            handles.push(tokio::spawn(async move {
                router.execute(GameCommand::Register).await
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            match handle.await.unwrap() {
                ServerMessage::Registered { player_id } => ids.push(player_id.get()),
                other => panic!("unexpected reply {:?}", other),
            }
        }
        ids.sort_unstable();
        assert_eq!(ids, (1..=32).collect::<Vec<u32>>());
    }

    #[tokio::test]
    async fn test_timestamps_taken_inside_critical_section() {
        let router = Arc::new(router());
        let guard = router.registry.lock().await;

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let router = router.clone();
                tokio::spawn(async move { router.execute(GameCommand::Register).await })
            })
            .collect();

        // Let every task queue on the lock before it is released.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let released = Instant::now();
        drop(guard);
        for handle in handles {
            handle.await.unwrap();
        }

        let registry = router.registry.lock().await;
        let seen: Vec<Instant> = (1..=8)
            .map(|raw| {
                let id = crate::game::player::PlayerId::new(raw).unwrap();
                registry.get_player(&id).unwrap().last_seen
            })
            .collect();
        assert!(seen.iter().all(|&t| t >= released));
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }
}
