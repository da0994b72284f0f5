//! Protocol Messages
//!
//! Two request families share one socket:
//!
//! - **Line commands**: one line of space-separated tokens, e.g.
//!   `update_player 1 100 440.0 false false 37`. Replies are a JSON object
//!   followed by `\r\n\r\n`.
//! - **HTTP-style**: `METHOD /path HTTP/1.x`, headers, optional JSON body.
//!   Replies are full HTTP/1.0 responses (see `network::http`).
//!
//! Raw text is classified once, at the boundary, into a [`Request`]; the
//! router only ever matches on typed values.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::game::player::{InvalidPlayerId, PlayerId, PlayerUpdate};
use crate::game::registry::GameSnapshot;

/// Reply status for success.
pub const STATUS_OK: &str = "OK";
/// Reply status for failure.
pub const STATUS_ERROR: &str = "ERROR";
/// Terminator appended to every line-command reply.
pub const LINE_TERMINATOR: &[u8] = b"\r\n\r\n";

// =============================================================================
// COMMANDS
// =============================================================================

/// A registry operation requested by a client, independent of protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum GameCommand {
    /// Join the lobby.
    Register,
    /// Ready up.
    SetReady {
        /// Player readying up.
        player_id: PlayerId,
    },
    /// Push per-frame state.
    UpdatePlayer {
        /// Player being updated.
        player_id: PlayerId,
        /// New state.
        update: PlayerUpdate,
    },
    /// Report a crash with the final score.
    GameOver {
        /// Player reporting.
        player_id: PlayerId,
        /// Final score.
        score: u64,
    },
    /// Poll the session.
    GetGameState {
        /// Player polling.
        player_id: PlayerId,
    },
}

/// A classified inbound request. Parse failures stay attached to the family
/// they came from so the error is answered in the same protocol.
#[derive(Debug)]
pub enum Request {
    /// Legacy line command.
    Line(Result<GameCommand, ProtocolError>),
    /// HTTP-style request.
    Http(Result<HttpRequest, ProtocolError>),
}

impl Request {
    /// Classify and parse raw request text.
    pub fn parse(raw: &str) -> Self {
        let first_line = raw.lines().next().unwrap_or("");
        if first_line.contains("HTTP/") {
            Request::Http(HttpRequest::parse(raw))
        } else {
            Request::Line(parse_line_command(raw))
        }
    }
}

/// Protocol-level failures. Always answered with an error payload.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Nothing but whitespace.
    #[error("Empty request")]
    Empty,

    /// First token names no known command.
    #[error("Unknown command '{0}'")]
    UnknownCommand(String),

    /// Command given the wrong number of arguments.
    #[error("'{command}' expects {expected} argument(s), got {got}")]
    WrongArity {
        /// Command name.
        command: &'static str,
        /// Required count.
        expected: usize,
        /// Supplied count.
        got: usize,
    },

    /// Non-numeric or out-of-range number.
    #[error("Invalid value '{value}' for {field}")]
    InvalidNumber {
        /// Field name.
        field: &'static str,
        /// Offending text.
        value: String,
    },

    /// Boolean other than `true`/`false`.
    #[error("Invalid boolean '{value}' for {field}")]
    InvalidBool {
        /// Field name.
        field: &'static str,
        /// Offending text.
        value: String,
    },

    /// Bad player id.
    #[error(transparent)]
    InvalidPlayerId(#[from] InvalidPlayerId),

    /// HTTP request line is not `METHOD PATH VERSION`.
    #[error("Malformed request line '{0}'")]
    MalformedRequestLine(String),

    /// Unparseable `Content-Length`.
    #[error("Invalid Content-Length '{0}'")]
    InvalidContentLength(String),

    /// Missing query parameter.
    #[error("Missing query parameter '{0}'")]
    MissingParameter(&'static str),

    /// JSON body did not match the endpoint's shape.
    #[error("Invalid JSON body: {0}")]
    InvalidBody(#[from] serde_json::Error),
}

// =============================================================================
// LINE COMMANDS
// =============================================================================

/// Parse a line command.
pub fn parse_line_command(line: &str) -> Result<GameCommand, ProtocolError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some((&name, args)) = tokens.split_first() else {
        return Err(ProtocolError::Empty);
    };

    match name {
        "register" => {
            expect_args("register", args, 0)?;
            Ok(GameCommand::Register)
        }
        "set_ready" => {
            expect_args("set_ready", args, 1)?;
            Ok(GameCommand::SetReady { player_id: args[0].parse()? })
        }
        "update_player" => {
            expect_args("update_player", args, 6)?;
            Ok(GameCommand::UpdatePlayer {
                player_id: args[0].parse()?,
                update: PlayerUpdate {
                    x: parse_coordinate("x", args[1])?,
                    y: parse_coordinate("y", args[2])?,
                    is_jumping: parse_bool("is_jumping", args[3])?,
                    is_ducking: parse_bool("is_ducking", args[4])?,
                    score: parse_number("score", args[5])?,
                },
            })
        }
        "game_over" => {
            expect_args("game_over", args, 2)?;
            Ok(GameCommand::GameOver {
                player_id: args[0].parse()?,
                score: parse_number("score", args[1])?,
            })
        }
        "get_game_state" => {
            expect_args("get_game_state", args, 1)?;
            Ok(GameCommand::GetGameState { player_id: args[0].parse()? })
        }
        other => Err(ProtocolError::UnknownCommand(other.to_string())),
    }
}

fn expect_args(command: &'static str, args: &[&str], expected: usize) -> Result<(), ProtocolError> {
    if args.len() != expected {
        return Err(ProtocolError::WrongArity { command, expected, got: args.len() });
    }
    Ok(())
}

fn parse_number<T: FromStr>(field: &'static str, value: &str) -> Result<T, ProtocolError> {
    value.parse().map_err(|_| ProtocolError::InvalidNumber {
        field,
        value: value.to_string(),
    })
}

fn parse_coordinate(field: &'static str, value: &str) -> Result<f64, ProtocolError> {
    let parsed: f64 = parse_number(field, value)?;
    if !parsed.is_finite() {
        return Err(ProtocolError::InvalidNumber { field, value: value.to_string() });
    }
    Ok(parsed)
}

/// Legacy clients print booleans as `True`/`False`.
fn parse_bool(field: &'static str, value: &str) -> Result<bool, ProtocolError> {
    if value.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if value.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err(ProtocolError::InvalidBool { field, value: value.to_string() })
    }
}

// =============================================================================
// HTTP REQUESTS
// =============================================================================

/// A parsed HTTP-style request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    /// Upper-cased method.
    pub method: String,
    /// Path without the query string.
    pub path: String,
    /// Query parameters in order of appearance.
    pub query: Vec<(String, String)>,
    /// Headers keyed by lower-cased name.
    pub headers: BTreeMap<String, String>,
    /// Body text (exactly `Content-Length` bytes when the header is present).
    pub body: String,
}

impl HttpRequest {
    /// Parse a complete request.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let (head, body) = split_head(raw);
        let mut lines = head.lines();
        let request_line = lines.next().unwrap_or("").trim();

        let parts: Vec<&str> = request_line.split_whitespace().collect();
        let &[method, target, version] = parts.as_slice() else {
            return Err(ProtocolError::MalformedRequestLine(request_line.to_string()));
        };
        if !version.starts_with("HTTP/") {
            return Err(ProtocolError::MalformedRequestLine(request_line.to_string()));
        }

        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, parse_query(query)),
            None => (target, Vec::new()),
        };

        let headers: BTreeMap<String, String> = lines
            .filter_map(|line| line.split_once(':'))
            .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
            .collect();

        let mut request = Self {
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
            query,
            headers,
            body: body.to_string(),
        };

        if let Some(raw_length) = request.header("content-length").map(str::to_string) {
            let invalid = || ProtocolError::InvalidContentLength(raw_length.clone());
            let length: usize = raw_length.parse().map_err(|_| invalid())?;
            if request.body.len() < length {
                return Err(invalid());
            }
            if request.body.is_char_boundary(length) {
                request.body.truncate(length);
            }
        }

        Ok(request)
    }

    /// First value of a query parameter.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// Split at the blank line ending the headers. Bare `\n\n` is tolerated.
fn split_head(raw: &str) -> (&str, &str) {
    let crlf = raw.find("\r\n\r\n").map(|i| (i, i + 4));
    let lf = raw.find("\n\n").map(|i| (i, i + 2));
    let split = match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    };
    match split {
        Some((head_end, body_start)) => (&raw[..head_end], &raw[body_start..]),
        None => (raw, ""),
    }
}

fn parse_query(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}

/// Body of `POST /ready`.
#[derive(Debug, Clone, Deserialize)]
pub struct ReadyBody {
    /// Player readying up.
    pub player_id: PlayerId,
}

/// Body of `POST /update`.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateBody {
    /// Player being updated.
    pub player_id: PlayerId,
    /// Horizontal position.
    pub x: f64,
    /// Vertical position.
    pub y: f64,
    /// Mid-jump.
    pub is_jumping: bool,
    /// Ducking.
    pub is_ducking: bool,
    /// Running score.
    pub score: u64,
}

impl From<UpdateBody> for GameCommand {
    fn from(body: UpdateBody) -> Self {
        GameCommand::UpdatePlayer {
            player_id: body.player_id,
            update: PlayerUpdate {
                x: body.x,
                y: body.y,
                is_jumping: body.is_jumping,
                is_ducking: body.is_ducking,
                score: body.score,
            },
        }
    }
}

/// Body of `POST /gameover`.
#[derive(Debug, Clone, Deserialize)]
pub struct GameOverBody {
    /// Player reporting.
    pub player_id: PlayerId,
    /// Final score.
    pub score: u64,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// JSON reply body, shared by both protocol families.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Registration result.
    Registered {
        /// Newly allocated id.
        player_id: PlayerId,
    },
    /// Plain acknowledgement.
    Ack,
    /// Session snapshot.
    State(GameSnapshot),
    /// Failure.
    Error {
        /// Human-readable description.
        message: String,
    },
}

impl ServerMessage {
    /// Build an error reply.
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error { message: message.into() }
    }

    /// Whether this reply reports success.
    pub fn is_ok(&self) -> bool {
        !matches!(self, ServerMessage::Error { .. })
    }

    /// Convert to a JSON value with a `status` field.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        let value = match self {
            ServerMessage::Registered { player_id } => json!({
                "status": STATUS_OK,
                "player_id": player_id.to_string(),
            }),
            ServerMessage::Ack => json!({ "status": STATUS_OK }),
            ServerMessage::State(snapshot) => {
                let mut value = serde_json::to_value(snapshot)?;
                if let Value::Object(map) = &mut value {
                    map.insert("status".to_string(), Value::from(STATUS_OK));
                }
                value
            }
            ServerMessage::Error { message } => json!({
                "status": STATUS_ERROR,
                "message": message,
            }),
        };
        Ok(value)
    }

    /// Serialize to JSON text.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.to_value()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: u32) -> PlayerId {
        PlayerId::new(raw).unwrap()
    }

    #[test]
    fn test_classifies_line_command() {
        let request = Request::parse("get_game_state 3\n");
        assert!(matches!(
            request,
            Request::Line(Ok(GameCommand::GetGameState { player_id })) if player_id == id(3)
        ));
    }

    #[test]
    fn test_classifies_http_request() {
        let request = Request::parse("GET /gamestate?player_id=1 HTTP/1.1\r\nHost: x\r\n\r\n");
        match request {
            Request::Http(Ok(req)) => {
                assert_eq!(req.method, "GET");
                assert_eq!(req.path, "/gamestate");
                assert_eq!(req.query_param("player_id"), Some("1"));
                assert_eq!(req.header("HOST"), Some("x"));
            }
            other => panic!("expected HTTP request, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_update_player() {
        let cmd = parse_line_command("update_player 2 100 440.5 True false 37").unwrap();
        assert_eq!(
            cmd,
            GameCommand::UpdatePlayer {
                player_id: id(2),
                update: PlayerUpdate {
                    x: 100.0,
                    y: 440.5,
                    is_jumping: true,
                    is_ducking: false,
                    score: 37,
                },
            }
        );
    }

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(parse_line_command("register").unwrap(), GameCommand::Register);
        assert_eq!(
            parse_line_command("set_ready 4\r\n").unwrap(),
            GameCommand::SetReady { player_id: id(4) }
        );
        assert_eq!(
            parse_line_command("game_over 1 50").unwrap(),
            GameCommand::GameOver { player_id: id(1), score: 50 }
        );
    }

    #[test]
    fn test_wrong_arity_rejected() {
        let err = parse_line_command("update_player 1 notanumber").unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::WrongArity { command: "update_player", expected: 6, got: 2 }
        ));
        assert!(parse_line_command("register now").is_err());
        assert!(parse_line_command("set_ready").is_err());
    }

    #[test]
    fn test_bad_fields_rejected() {
        assert!(matches!(
            parse_line_command("update_player 1 abc 2 true false 3"),
            Err(ProtocolError::InvalidNumber { field: "x", .. })
        ));
        assert!(matches!(
            parse_line_command("update_player 1 1 2 yes false 3"),
            Err(ProtocolError::InvalidBool { field: "is_jumping", .. })
        ));
        assert!(matches!(
            parse_line_command("update_player 1 NaN 2 true false 3"),
            Err(ProtocolError::InvalidNumber { field: "x", .. })
        ));
        assert!(matches!(
            parse_line_command("game_over 1 -5"),
            Err(ProtocolError::InvalidNumber { field: "score", .. })
        ));
        assert!(matches!(
            parse_line_command("set_ready abc"),
            Err(ProtocolError::InvalidPlayerId(_))
        ));
    }

    #[test]
    fn test_unknown_and_empty() {
        assert!(matches!(
            parse_line_command("fly 1"),
            Err(ProtocolError::UnknownCommand(name)) if name == "fly"
        ));
        assert!(matches!(parse_line_command("   \r\n"), Err(ProtocolError::Empty)));
    }

    #[test]
    fn test_http_body_respects_content_length() {
        let raw = "POST /ready HTTP/1.1\r\nContent-Length: 15\r\n\r\n{\"player_id\":1}trailing";
        let req = HttpRequest::parse(raw).unwrap();
        assert_eq!(req.body, "{\"player_id\":1}");

        let body: ReadyBody = serde_json::from_str(&req.body).unwrap();
        assert_eq!(body.player_id, id(1));
    }

    #[test]
    fn test_http_malformed_request_line() {
        assert!(matches!(
            HttpRequest::parse("GET HTTP/1.1\r\n\r\n"),
            Err(ProtocolError::MalformedRequestLine(_))
        ));
        assert!(matches!(
            HttpRequest::parse("POST /x HTTP/1.1\r\nContent-Length: lots\r\n\r\n"),
            Err(ProtocolError::InvalidContentLength(_))
        ));
    }

    #[test]
    fn test_http_body_shorter_than_content_length() {
        assert!(matches!(
            HttpRequest::parse("POST /ready HTTP/1.1\r\nContent-Length: 18446744073709551615\r\n\r\n"),
            Err(ProtocolError::InvalidContentLength(_))
        ));
        assert!(matches!(
            HttpRequest::parse("POST /ready HTTP/1.1\r\nContent-Length: 20\r\n\r\n{\"player_id\":1}"),
            Err(ProtocolError::InvalidContentLength(_))
        ));
    }

    #[test]
    fn test_update_body_into_command() {
        let body: UpdateBody = serde_json::from_str(
            r#"{"player_id":"3","x":1,"y":2.5,"is_jumping":false,"is_ducking":true,"score":9}"#,
        )
        .unwrap();
        let cmd: GameCommand = body.into();
        assert!(matches!(
            cmd,
            GameCommand::UpdatePlayer { player_id, update } if player_id == id(3) && update.is_ducking && update.x == 1.0
        ));
    }

    #[test]
    fn test_reply_json_shapes() {
        let registered = ServerMessage::Registered { player_id: id(5) }.to_value().unwrap();
        assert_eq!(registered, json!({"status": "OK", "player_id": "5"}));

        let ack = ServerMessage::Ack.to_value().unwrap();
        assert_eq!(ack, json!({"status": "OK"}));

        let err = ServerMessage::error("Unknown command 'x'").to_value().unwrap();
        assert_eq!(err["status"], "ERROR");
        assert_eq!(err["message"], "Unknown command 'x'");
        assert!(!ServerMessage::error("x").is_ok());
    }

    #[test]
    fn test_state_reply_carries_status() {
        let snapshot = GameSnapshot {
            game_started: false,
            winner: None,
            all_players: BTreeMap::new(),
        };
        let value = ServerMessage::State(snapshot).to_value().unwrap();
        assert_eq!(value["status"], "OK");
        assert_eq!(value["game_started"], false);
        assert!(value["winner"].is_null());
        assert_eq!(value["all_players"], json!({}));
    }
}
