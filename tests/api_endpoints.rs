use std::io::{Cursor, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use image::{ImageFormat, RgbImage};
use serde_json::Value;

use waste_zone_detector::api::{ApiConfig, ApiHandle, ApiServer};
use waste_zone_detector::{
    AppContext, DetectionLogStore, DetectionRecord, ModelState, RawDetection, SqliteDetectionLog,
    StubBackend,
};

const BOUNDARY: &str = "----wastetestboundary";

struct TestApi {
    _dir: tempfile::TempDir,
    api_handle: Option<ApiHandle>,
}

impl TestApi {
    fn new(model: ModelState, with_log: bool) -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let mut ctx = AppContext::new(model, 0.5);
        if with_log {
            let db_path = dir.path().join("detections.db");
            let store = SqliteDetectionLog::open(&db_path.to_string_lossy())?;
            ctx = ctx.with_log_store(Box::new(store));
        }
        let api_config = ApiConfig {
            addr: "127.0.0.1:0".to_string(),
            max_request_bytes: 1024 * 1024,
        };
        let api_handle = ApiServer::new(api_config, Arc::new(ctx)).spawn()?;
        Ok(Self {
            _dir: dir,
            api_handle: Some(api_handle),
        })
    }

    fn with_detections(detections: Vec<RawDetection>) -> Result<Self> {
        Self::new(
            ModelState::ready(StubBackend::new().with_detections(detections)),
            true,
        )
    }

    fn handle(&self) -> &ApiHandle {
        self.api_handle
            .as_ref()
            .expect("test API handle should be initialized")
    }

    fn send(&self, request: &[u8]) -> Result<(String, String)> {
        let mut stream = TcpStream::connect(self.handle().addr)?;
        stream.write_all(request)?;
        read_response(&mut stream)
    }
}

impl Drop for TestApi {
    fn drop(&mut self) {
        if let Some(handle) = self.api_handle.take() {
            handle.stop().expect("failed to stop API server");
        }
    }
}

fn read_response(stream: &mut TcpStream) -> Result<(String, String)> {
    let mut response = String::new();
    stream.read_to_string(&mut response)?;
    let mut parts = response.splitn(2, "\r\n\r\n");
    let headers = parts.next().unwrap_or("").to_string();
    let body = parts.next().unwrap_or("").to_string();
    Ok((headers, body))
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    RgbImage::new(width, height)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .expect("encode png");
    buf
}

fn detect_request(image: &[u8], zone: Option<&str>) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        b"Content-Disposition: form-data; name=\"file\"; filename=\"frame.png\"\r\n",
    );
    body.extend_from_slice(b"Content-Type: image/png\r\n\r\n");
    body.extend_from_slice(image);
    body.extend_from_slice(b"\r\n");
    if let Some(zone) = zone {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            b"Content-Disposition: form-data; name=\"detection_zone\"\r\n\r\n",
        );
        body.extend_from_slice(zone.as_bytes());
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    let mut request = format!(
        "POST /detect HTTP/1.1\r\nHost: localhost\r\n\
         Content-Type: multipart/form-data; boundary={BOUNDARY}\r\n\
         Content-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    request.extend_from_slice(&body);
    request
}

#[test]
fn root_reports_liveness() -> Result<()> {
    let api = TestApi::new(ModelState::Unavailable("none".into()), false)?;
    let (headers, body) = api.send(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
    assert!(headers.contains("200 OK"));
    assert!(headers.contains("Access-Control-Allow-Origin: *"));
    let value: Value = serde_json::from_str(&body)?;
    assert!(value["message"].as_str().unwrap_or("").contains("/detect"));
    Ok(())
}

#[test]
fn detect_returns_verdict_and_logs_it() -> Result<()> {
    let api = TestApi::with_detections(vec![RawDetection::new(
        3,
        0.9,
        [900.0, 100.0, 1100.0, 400.0],
    )])?;

    let (headers, body) = api.send(&detect_request(&png(1280, 720), None))?;
    assert!(headers.contains("200 OK"), "{headers}");
    let value: Value = serde_json::from_str(&body)?;
    assert_eq!(value["waste_detection"]["waste_type"], "plastic");
    assert_eq!(value["waste_detection"]["is_correct"], true);
    assert_eq!(value["detection_count"], 1);
    assert!(value["performance"]["inference_fps"].is_number());
    assert!(value["result_image"]
        .as_str()
        .unwrap_or("")
        .starts_with("data:image/jpeg;base64,"));

    let (headers, body) = api.send(b"GET /analytics HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
    assert!(headers.contains("200 OK"));
    let value: Value = serde_json::from_str(&body)?;
    assert_eq!(value["total_detections"], 1);
    assert_eq!(value["waste_types"]["plastic"], 1);
    assert_eq!(value["recent_detections"][0]["waste_type"], "plastic");
    Ok(())
}

#[test]
fn detect_with_user_zone_translates_boxes() -> Result<()> {
    let api = TestApi::with_detections(vec![RawDetection::new(
        1,
        0.8,
        [20.0, 20.0, 80.0, 80.0],
    )])?;
    let (headers, body) = api.send(&detect_request(&png(640, 480), Some("[100,100,300,300]")))?;
    assert!(headers.contains("200 OK"), "{headers}");
    let value: Value = serde_json::from_str(&body)?;
    assert_eq!(value["detections"][0]["bbox"], serde_json::json!([120, 120, 180, 180]));
    assert_eq!(value["waste_detection"]["waste_type"], "metal");
    assert_eq!(value["waste_detection"]["is_correct"], true);
    Ok(())
}

#[test]
fn detect_rejects_bad_input_with_400() -> Result<()> {
    let api = TestApi::with_detections(Vec::new())?;

    let (headers, body) = api.send(&detect_request(&png(64, 64), Some("[1,2")))?;
    assert!(headers.contains("400 Bad Request"));
    assert!(body.contains(r#""detail":"Invalid detection zone format""#));

    let (headers, body) = api.send(&detect_request(b"not an image", None))?;
    assert!(headers.contains("400 Bad Request"));
    assert!(body.contains(r#""detail":"Invalid image file""#));

    let request = "POST /detect HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: 2\r\n\r\n{}";
    let (headers, _body) = api.send(request.as_bytes())?;
    assert!(headers.contains("400 Bad Request"));
    Ok(())
}

#[test]
fn detect_without_model_is_500() -> Result<()> {
    let api = TestApi::new(ModelState::Unavailable("no weights".into()), false)?;
    let (headers, body) = api.send(&detect_request(&png(64, 64), None))?;
    assert!(headers.contains("500 Internal Server Error"));
    assert!(body.contains(r#""detail":"Model not loaded""#));
    Ok(())
}

#[test]
fn analytics_without_log_serves_fallback() -> Result<()> {
    let api = TestApi::new(ModelState::Unavailable("no weights".into()), false)?;
    let (headers, body) = api.send(b"GET /analytics HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
    assert!(headers.contains("200 OK"));
    let value: Value = serde_json::from_str(&body)?;
    assert_eq!(value["total_detections"], 100);
    assert_eq!(value["correct_disposals"], 78);
    assert_eq!(value["waste_types"]["plastic"], 45);
    assert_eq!(value["recent_detections"].as_array().map(Vec::len), Some(3));
    Ok(())
}

#[test]
fn analytics_reads_existing_log_records() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db_path = dir.path().join("detections.db");
    let store = SqliteDetectionLog::open(&db_path.to_string_lossy())?;
    for (second, waste, correct) in [(1, "glass", true), (2, "paper", false), (3, "glass", true)] {
        store.append(&DetectionRecord {
            timestamp: format!("2024-06-01T08:00:0{second}.000Z"),
            waste_type: waste.to_string(),
            is_correct: correct,
            inference_speed: 15.0,
        })?;
    }
    let ctx = AppContext::new(ModelState::Unavailable("none".into()), 0.5)
        .with_log_store(Box::new(store));
    let handle = ApiServer::new(
        ApiConfig {
            addr: "127.0.0.1:0".to_string(),
            ..ApiConfig::default()
        },
        Arc::new(ctx),
    )
    .spawn()?;

    let mut stream = TcpStream::connect(handle.addr)?;
    stream.write_all(b"GET /analytics HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
    let (headers, body) = read_response(&mut stream)?;
    handle.stop()?;

    assert!(headers.contains("200 OK"));
    let value: Value = serde_json::from_str(&body)?;
    assert_eq!(value["total_detections"], 3);
    assert_eq!(value["correct_disposals"], 2);
    assert_eq!(value["incorrect_disposals"], 1);
    assert_eq!(value["waste_types"]["glass"], 2);
    assert_eq!(value["waste_types"]["metal"], 0);
    assert_eq!(value["recent_detections"][0]["timestamp"], "2024-06-01T08:00:03.000Z");
    Ok(())
}

#[test]
fn unknown_routes_and_methods() -> Result<()> {
    let api = TestApi::new(ModelState::Unavailable("none".into()), false)?;

    let (headers, body) = api.send(b"GET /events HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
    assert!(headers.contains("404 Not Found"));
    assert!(body.contains(r#""detail":"Not Found""#));

    let (headers, _body) = api.send(b"GET /detect HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
    assert!(headers.contains("405 Method Not Allowed"));

    let (headers, body) = api.send(
        b"OPTIONS /detect HTTP/1.1\r\nHost: localhost\r\nOrigin: http://localhost:3000\r\n\r\n",
    )?;
    assert!(headers.contains("204 No Content"));
    assert!(headers.contains("Access-Control-Allow-Methods: GET, POST, OPTIONS"));
    assert!(body.is_empty());
    Ok(())
}

#[test]
fn expect_continue_gets_interim_response() -> Result<()> {
    let api = TestApi::with_detections(vec![RawDetection::new(
        3,
        0.9,
        [900.0, 100.0, 1100.0, 400.0],
    )])?;
    let request = detect_request(&png(1280, 720), None);
    let split = request
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("request has a header block");
    let (head, body) = (&request[..split], &request[split + 4..]);

    let mut stream = TcpStream::connect(api.handle().addr)?;
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    stream.write_all(head)?;
    stream.write_all(b"\r\nExpect: 100-continue\r\n\r\n")?;

    let mut interim = Vec::new();
    let mut byte = [0u8; 1];
    while !interim.ends_with(b"\r\n\r\n") {
        stream.read_exact(&mut byte)?;
        interim.push(byte[0]);
    }
    assert_eq!(interim, b"HTTP/1.1 100 Continue\r\n\r\n");

    stream.write_all(body)?;
    let (headers, body) = read_response(&mut stream)?;
    assert!(headers.contains("200 OK"), "{headers}");
    let value: Value = serde_json::from_str(&body)?;
    assert_eq!(value["waste_detection"]["waste_type"], "plastic");
    Ok(())
}

#[test]
fn oversized_body_is_413() -> Result<()> {
    let api = TestApi::new(ModelState::Unavailable("none".into()), false)?;
    // Only the headers are sent; the declared length alone exceeds the limit.
    let request = format!(
        "POST /detect HTTP/1.1\r\nHost: localhost\r\n\
         Content-Type: multipart/form-data; boundary={BOUNDARY}\r\n\
         Content-Length: {}\r\n\r\n",
        8 * 1024 * 1024
    );
    let (headers, body) = api.send(request.as_bytes())?;
    assert!(headers.contains("413 Payload Too Large"));
    assert!(body.contains("too large"));
    Ok(())
}
