//! HTTP server exposing the question gateway and tag checks
//! Simple HTTP server using tokio and basic HTTP handling
//!
//! Routes:
//! - `GET  /health`
//! - `POST /ask`            `{"question": "...", "target": "billing" | "config"}`
//! - `POST /tags/validate`  `{"tags": {...}}`
//! - `POST /tags/correct`   `[{"Key": "...", "Value": "..."}]`

use finops_copilot::config::{AppConfig, Target};
use finops_copilot::nlq::{NlqGateway, Question};
use finops_copilot::tags::{correct_tags, handle_validation_event, Tag};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

const MAX_REQUEST_BYTES: usize = 1_000_000;

struct AppState {
    gateways: HashMap<Target, NlqGateway>,
}

#[derive(Debug, Deserialize)]
struct AskRequest {
    question: String,
    #[serde(default)]
    target: Target,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env()?;
    let mut gateways = HashMap::new();
    for target in [Target::Billing, Target::Config] {
        match config.gateway(target).await {
            Ok(gateway) => {
                gateways.insert(target, gateway);
            }
            Err(e) => warn!(?target, "gateway unavailable: {}", e),
        }
    }
    let state = Arc::new(AppState { gateways });

    let addr = std::env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    loop {
        let (stream, peer) = listener.accept().await?;
        debug!("New connection from: {}", peer);
        tokio::spawn(handle_connection(stream, Arc::clone(&state)));
    }
}

async fn handle_connection(mut stream: TcpStream, state: Arc<AppState>) {
    let mut buffer = Vec::new();
    let mut temp_buf = [0; 8192];

    // Read request with timeout to prevent hanging
    let read_result = timeout(Duration::from_secs(5), async {
        loop {
            let n = stream.read(&mut temp_buf).await?;
            if n == 0 {
                break;
            }
            buffer.extend_from_slice(&temp_buf[..n]);
            if request_complete(&buffer) || buffer.len() > MAX_REQUEST_BYTES {
                break;
            }
        }
        Ok::<(), std::io::Error>(())
    })
    .await;

    match read_result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            warn!("Failed to read from stream: {}", e);
            return;
        }
        Err(_) => {
            warn!("Request read timeout");
            return;
        }
    }
    if buffer.is_empty() {
        return;
    }

    let response = match String::from_utf8(buffer) {
        Ok(request) => handle_request(&request, &state).await,
        Err(_) => create_response(400, "Bad Request", r#"{"error":"request is not valid UTF-8"}"#),
    };
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        error!("Failed to write response: {}", e);
    }
}

fn request_complete(buffer: &[u8]) -> bool {
    let Ok(text) = std::str::from_utf8(buffer) else {
        return false;
    };
    let Some(headers_end) = text.find("\r\n\r\n") else {
        return false;
    };
    match extract_content_length(&text[..headers_end]) {
        Some(length) => buffer.len() >= headers_end + 4 + length,
        None => true,
    }
}

fn extract_content_length(headers: &str) -> Option<usize> {
    headers.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if name.trim().eq_ignore_ascii_case("content-length") {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}

async fn handle_request(request: &str, state: &AppState) -> String {
    let Some(request_line) = request.lines().next() else {
        return create_response(400, "Bad Request", "{}");
    };
    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 2 {
        return create_response(400, "Bad Request", "{}");
    }

    let method = parts[0];
    let path = parts[1].split('?').next().unwrap_or("/").trim_end_matches('/');
    let body = request.split_once("\r\n\r\n").map(|(_, b)| b).unwrap_or("");
    debug!("Request: {} {}", method, path);

    match (method, path) {
        ("GET", "/health") => create_response(200, "OK", r#"{"status":"ok","service":"finops-copilot"}"#),
        ("POST", "/ask") => handle_ask(body, state).await,
        ("POST", "/tags/validate") => handle_validate_tags(body),
        ("POST", "/tags/correct") => handle_correct_tags(body),
        ("OPTIONS", _) => create_response(204, "No Content", ""),
        _ => create_response(404, "Not Found", r#"{"error":"not found"}"#),
    }
}

async fn handle_ask(body: &str, state: &AppState) -> String {
    let request: AskRequest = match serde_json::from_str(body) {
        Ok(r) => r,
        Err(e) => return error_response(400, "Bad Request", &format!("invalid request body: {}", e)),
    };
    let Some(gateway) = state.gateways.get(&request.target) else {
        return error_response(503, "Service Unavailable", &format!("{:?} backend is not configured", request.target));
    };

    let payload = gateway.ask(&Question::new(request.question)).await;
    json_response(200, "OK", &payload)
}

fn handle_validate_tags(body: &str) -> String {
    let event: serde_json::Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => return error_response(400, "Bad Request", &format!("invalid request body: {}", e)),
    };
    match handle_validation_event(&event) {
        Ok(response) => json_response(200, "OK", &response),
        Err(e) => error_response(400, "Bad Request", &e.to_string()),
    }
}

fn handle_correct_tags(body: &str) -> String {
    match serde_json::from_str::<Vec<Tag>>(body) {
        Ok(tags) => json_response(200, "OK", &correct_tags(&tags)),
        Err(e) => error_response(400, "Bad Request", &format!("invalid request body: {}", e)),
    }
}

fn json_response<T: serde::Serialize>(status: u16, status_text: &str, value: &T) -> String {
    match serde_json::to_string(value) {
        Ok(body) => create_response(status, status_text, &body),
        Err(e) => error_response(500, "Internal Server Error", &e.to_string()),
    }
}

fn error_response(status: u16, status_text: &str, message: &str) -> String {
    let body = serde_json::json!({ "error": message }).to_string();
    create_response(status, status_text, &body)
}

fn create_response(status: u16, status_text: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: application/json\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n\
         Access-Control-Allow-Headers: Content-Type\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        status,
        status_text,
        body.len(),
        body
    )
}
