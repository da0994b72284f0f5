//! HTTP/1.0 responses and the static-file fallback.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::error;

use crate::network::protocol::ServerMessage;

/// Value of the `Server` header.
pub const SERVER_NAME: &str = concat!("dino-run/", env!("CARGO_PKG_VERSION"));

/// Banner served at `GET /`.
const INDEX_BODY: &str = "Dino Run coordination server";

/// An outgoing HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Extra headers beyond the standard set.
    pub headers: Vec<(String, String)>,
    /// Body bytes.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Empty response with the given status.
    pub fn new(status: u16) -> Self {
        Self { status, headers: Vec::new(), body: Vec::new() }
    }

    /// Response with a body of the given content type.
    pub fn with_body(status: u16, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".to_string(), content_type.to_string())],
            body: body.into(),
        }
    }

    /// JSON reply. Serialization failure degrades to a bare 500.
    pub fn json(status: u16, message: &ServerMessage) -> Self {
        match message.to_json() {
            Ok(text) => Self::with_body(status, "application/json", text),
            Err(e) => {
                error!("Failed to serialize reply: {}", e);
                Self::new(500)
            }
        }
    }

    /// JSON error reply.
    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self::json(status, &ServerMessage::error(message))
    }

    /// Reason phrase for the status code.
    pub fn reason(&self) -> &'static str {
        match self.status {
            200 => "OK",
            400 => "Bad Request",
            404 => "Not Found",
            500 => "Internal Server Error",
            _ => "Unknown",
        }
    }

    /// Encode status line, headers and body.
    pub fn to_bytes(&self, now: DateTime<Utc>) -> Vec<u8> {
        let mut head = format!("HTTP/1.0 {} {}\r\n", self.status, self.reason());
        head.push_str(&format!("Date: {}\r\n", now.format("%a, %d %b %Y %H:%M:%S GMT")));
        head.push_str("Connection: close\r\n");
        head.push_str(&format!("Server: {}\r\n", SERVER_NAME));
        head.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        for (name, value) in &self.headers {
            head.push_str(&format!("{}: {}\r\n", name, value));
        }
        head.push_str("\r\n");

        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }
}

/// Response for `GET /`.
pub fn index() -> HttpResponse {
    HttpResponse::with_body(200, "text/plain", INDEX_BODY)
}

/// Content type by file extension.
pub fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") | Some("htm") => "text/html",
        Some("txt") => "text/plain",
        Some("json") => "application/json",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("pdf") => "application/pdf",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        _ => "application/octet-stream",
    }
}

/// Serves files below a root directory.
#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
}

impl StaticFiles {
    /// Serve from `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a request path to a file below the root.
    fn resolve(&self, request_path: &str) -> Option<PathBuf> {
        let relative = request_path.trim_start_matches('/');
        if relative.is_empty() || relative.contains("..") {
            return None;
        }
        Some(self.root.join(relative))
    }

    /// Serve a file, or 404 when it is missing, a directory, or escapes the root.
    pub async fn serve(&self, request_path: &str) -> HttpResponse {
        let Some(path) = self.resolve(request_path) else {
            return HttpResponse::error(404, "Not found");
        };

        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            _ => return HttpResponse::error(404, "Not found"),
        }

        match tokio::fs::read(&path).await {
            Ok(contents) => HttpResponse::with_body(200, content_type_for(&path), contents),
            Err(e) => {
                error!("Error reading file {}: {}", path.display(), e);
                HttpResponse::error(500, "Internal error")
            }
        }
    }
}
