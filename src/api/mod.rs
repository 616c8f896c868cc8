//! HTTP surface of the waste detection service.
//!
//! A small HTTP/1.1 server over `std::net::TcpListener`: one accept loop that
//! polls a shutdown flag, one thread per connection, one request per
//! connection. Every response is JSON and carries permissive CORS headers.

pub mod multipart;

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::analytics::analytics;
use crate::config::WasteApiConfig;
use crate::context::AppContext;
use crate::error::DetectError;
use crate::pipeline::detect_waste;

const MAX_HEADER_BYTES: usize = 16 * 1024;
const READ_TIMEOUT: Duration = Duration::from_secs(10);
const ROOT_MESSAGE: &str = "Waste Detection API. Use /detect endpoint to detect waste in images.";

/// Form field carrying the uploaded image.
pub const IMAGE_FIELD: &str = "file";
/// Form field carrying the optional `[x1, y1, x2, y2]` zone.
pub const ZONE_FIELD: &str = "detection_zone";

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub max_request_bytes: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        let defaults = WasteApiConfig::default();
        Self {
            addr: defaults.api_addr,
            max_request_bytes: defaults.max_request_bytes,
        }
    }
}

impl From<&WasteApiConfig> for ApiConfig {
    fn from(cfg: &WasteApiConfig) -> Self {
        Self {
            addr: cfg.api_addr.clone(),
            max_request_bytes: cfg.max_request_bytes,
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    ctx: Arc<AppContext>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, ctx: Arc<AppContext>) -> Self {
        Self { cfg, ctx }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "api configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;
        log::info!("waste detection api listening on http://{}", addr);

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let cfg = self.cfg;
        let ctx = self.ctx;
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, cfg, ctx, shutdown_thread) {
                log::error!("waste detection api stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    cfg: ApiConfig,
    ctx: Arc<AppContext>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let ctx = ctx.clone();
                let max_request_bytes = cfg.max_request_bytes;
                std::thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, &ctx, max_request_bytes) {
                        log::warn!("request from {} rejected: {}", peer, err);
                    }
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(
    mut stream: TcpStream,
    ctx: &AppContext,
    max_request_bytes: usize,
) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(READ_TIMEOUT))?;

    let request = match read_request(&mut stream, max_request_bytes)? {
        ReadOutcome::Request(request) => request,
        ReadOutcome::TooLarge(len) => {
            write_detail(&mut stream, 413, "Request body too large")?;
            return Err(anyhow!(
                "request body of {} bytes exceeds limit of {}",
                len,
                max_request_bytes
            ));
        }
    };
    log::debug!("{} {}", request.method, request.path);

    let route = Route::parse(&request.path);
    if request.method == "OPTIONS" && route.is_some() {
        return write_response(&mut stream, 204, &[]);
    }

    match (route, request.method.as_str()) {
        (Some(Route::Root), "GET") => write_json(
            &mut stream,
            200,
            &serde_json::json!({ "message": ROOT_MESSAGE }),
        ),
        (Some(Route::Analytics), "GET") => {
            write_json(&mut stream, 200, &analytics(ctx.log_store()))
        }
        (Some(Route::Detect), "POST") => match handle_detect(ctx, &request) {
            Ok(body) => write_response(&mut stream, 200, &body),
            Err(err) => {
                if err.status() >= 500 {
                    log::error!("detection failed: {}", err);
                } else {
                    log::warn!("detection rejected: {}", err);
                }
                write_detail(&mut stream, err.status(), &err.to_string())
            }
        },
        (Some(_), _) => write_detail(&mut stream, 405, "Method Not Allowed"),
        (None, _) => write_detail(&mut stream, 404, "Not Found"),
    }
}

fn handle_detect(ctx: &AppContext, request: &HttpRequest) -> Result<Vec<u8>, DetectError> {
    let content_type = request
        .headers
        .get("content-type")
        .map(String::as_str)
        .unwrap_or_default();
    let boundary = multipart::boundary(content_type)
        .ok_or_else(|| DetectError::input("Expected a multipart/form-data upload"))?;
    let parts = multipart::parse(&request.body, &boundary).map_err(|err| {
        log::debug!("multipart parse failed: {:#}", err);
        DetectError::input("Malformed multipart body")
    })?;

    let image = parts
        .iter()
        .find(|part| part.name == IMAGE_FIELD)
        .ok_or_else(|| DetectError::input("Missing image file"))?;
    let zone = match parts.iter().find(|part| part.name == ZONE_FIELD) {
        Some(part) => Some(
            part.text()
                .map_err(|_| DetectError::input(crate::pipeline::INVALID_ZONE))?,
        ),
        None => None,
    };

    let response = detect_waste(ctx, &image.data, zone)?;
    serde_json::to_vec(&response).map_err(|err| DetectError::Inference(err.to_string()))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Route {
    Root,
    Detect,
    Analytics,
}

impl Route {
    fn parse(path: &str) -> Option<Self> {
        match path {
            "/" => Some(Route::Root),
            "/detect" => Some(Route::Detect),
            "/analytics" => Some(Route::Analytics),
            _ => None,
        }
    }
}

enum ReadOutcome {
    Request(HttpRequest),
    TooLarge(usize),
}

fn read_request(stream: &mut TcpStream, max_request_bytes: usize) -> Result<ReadOutcome> {
    let mut buf = [0u8; 8192];
    let mut data = Vec::new();
    let header_end = loop {
        if let Some(idx) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break idx;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(anyhow!("request headers too large"));
        }
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before end of headers"));
        }
        data.extend_from_slice(&buf[..n]);
    };

    let head = String::from_utf8_lossy(&data[..header_end]).into_owned();
    let mut lines = head.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length = match headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| anyhow!("invalid content-length '{}'", value))?,
        None => 0,
    };
    if content_length > max_request_bytes {
        return Ok(ReadOutcome::TooLarge(content_length));
    }

    let mut body = data.split_off(header_end + 4);
    body.truncate(content_length);
    if body.len() < content_length {
        let expects_continue = headers
            .get("expect")
            .is_some_and(|v| v.eq_ignore_ascii_case("100-continue"));
        if expects_continue {
            stream.write_all(b"HTTP/1.1 100 Continue\r\n\r\n")?;
            stream.flush()?;
        }
        let already = body.len();
        body.resize(content_length, 0);
        stream.read_exact(&mut body[already..])?;
    }

    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(ReadOutcome::Request(HttpRequest {
        method: method.to_ascii_uppercase(),
        path,
        headers,
        body,
    }))
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

fn write_detail(stream: &mut TcpStream, status: u16, detail: &str) -> Result<()> {
    write_json(stream, status, &serde_json::json!({ "detail": detail }))
}

fn write_json<T: Serialize>(stream: &mut TcpStream, status: u16, body: &T) -> Result<()> {
    let payload = serde_json::to_vec(body)?;
    write_response(stream, status, &payload)
}

fn write_response(stream: &mut TcpStream, status: u16, body: &[u8]) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        204 => "HTTP/1.1 204 No Content",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        413 => "HTTP/1.1 413 Payload Too Large",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let content_type = if body.is_empty() {
        String::new()
    } else {
        "Content-Type: application/json\r\n".to_string()
    };
    let header = format!(
        "{status_line}\r\n{content_type}Content-Length: {len}\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n\
         Access-Control-Allow-Headers: *\r\n\
         Cache-Control: no-store\r\nConnection: close\r\n\r\n",
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_known_paths_only() {
        assert_eq!(Route::parse("/"), Some(Route::Root));
        assert_eq!(Route::parse("/detect"), Some(Route::Detect));
        assert_eq!(Route::parse("/analytics"), Some(Route::Analytics));
        assert_eq!(Route::parse("/detect/"), None);
        assert_eq!(Route::parse("/health"), None);
    }

    #[test]
    fn api_config_follows_service_config() {
        let cfg = WasteApiConfig {
            api_addr: "127.0.0.1:0".to_string(),
            max_request_bytes: 1024,
            ..WasteApiConfig::default()
        };
        let api = ApiConfig::from(&cfg);
        assert_eq!(api.addr, "127.0.0.1:0");
        assert_eq!(api.max_request_bytes, 1024);
    }
}
