//! HTTP binding of the control surface.
//!
//! A deliberately small HTTP/1.1 server over `std::net`: the accept loop
//! runs on one thread and every connection is handled on its own thread, so
//! a long-lived video stream never starves control requests (and control
//! requests never block on camera I/O; they only touch the session and
//! registry locks).
//!
//! Routes:
//! - `GET  /health`
//! - `GET  /status` (session snapshot, polled by the UI)
//! - `POST /password` with `{"password": "..."}`
//! - `POST /registration/start` with `{"password": "..."}`
//! - `POST /registration/name` with `{"name": "..."}`
//! - `POST /registration/submit` with `{"name": "..."}`
//! - `POST /registration/recapture`
//! - `POST /registration/cancel`
//! - `GET  /video_feed` (MJPEG, one part per published frame)

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::Deserialize;

use crate::control::ControlSurface;
use crate::errors::ControlError;
use crate::publish::FramePublisher;

const MAX_REQUEST_BYTES: usize = 8192;
const STREAM_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8080".to_string(),
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
    control: Arc<ControlSurface>,
    publisher: Arc<FramePublisher>,
}

impl ApiServer {
    pub fn new(
        cfg: ApiConfig,
        control: Arc<ControlSurface>,
        publisher: Arc<FramePublisher>,
    ) -> Self {
        Self {
            cfg,
            control,
            publisher,
        }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = Arc::clone(&shutdown);
        let control = self.control;
        let publisher = self.publisher;
        let join = std::thread::Builder::new()
            .name("api".to_string())
            .spawn(move || run_api(listener, control, publisher, shutdown_thread))?;

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    control: Arc<ControlSurface>,
    publisher: Arc<FramePublisher>,
    shutdown: Arc<AtomicBool>,
) {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                let control = Arc::clone(&control);
                let publisher = Arc::clone(&publisher);
                let shutdown = Arc::clone(&shutdown);
                let spawned = std::thread::Builder::new()
                    .name("api-conn".to_string())
                    .spawn(move || {
                        if let Err(err) = handle_connection(stream, &control, &publisher, &shutdown)
                        {
                            log::debug!("api request failed: {:#}", err);
                        }
                    });
                if let Err(err) = spawned {
                    log::warn!("failed to spawn connection thread: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(err) => {
                log::error!("api accept failed: {}", err);
                break;
            }
        }
    }
}

fn handle_connection(
    mut stream: TcpStream,
    control: &ControlSurface,
    publisher: &FramePublisher,
    shutdown: &AtomicBool,
) -> Result<()> {
    stream.set_nonblocking(false)?;
    let request = read_request(&mut stream)?;

    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/health") => write_json_response(&mut stream, 200, r#"{"status":"ok"}"#),
        ("GET", "/status") => {
            let payload = serde_json::to_vec(&control.get_status())?;
            write_response(&mut stream, 200, "application/json", &payload)
        }
        ("GET", "/video_feed") => stream_video(stream, publisher, shutdown),
        ("POST", "/password") => {
            let outcome = parse_body(&request).and_then(|body: PasswordBody| {
                control.check_password(&body.password).map(|_| ok_body())
            });
            respond(&mut stream, outcome)
        }
        ("POST", "/registration/start") => {
            let outcome = parse_body(&request).and_then(|body: PasswordBody| {
                control
                    .start_registration(&body.password)
                    .map(|started| format!(r#"{{"started":{}}}"#, started))
            });
            respond(&mut stream, outcome)
        }
        ("POST", "/registration/name") => {
            let outcome = parse_body(&request)
                .and_then(|body: NameBody| control.set_pending_name(&body.name).map(|_| ok_body()));
            respond(&mut stream, outcome)
        }
        ("POST", "/registration/submit") => {
            let outcome = parse_body(&request).and_then(|body: NameBody| {
                control.submit_registration(&body.name).map(|_| ok_body())
            });
            respond(&mut stream, outcome)
        }
        ("POST", "/registration/recapture") => {
            respond(&mut stream, control.recapture().map(|_| ok_body()))
        }
        ("POST", "/registration/cancel") => {
            control.cancel_registration();
            write_json_response(&mut stream, 200, &ok_body())
        }
        ("GET", _) | ("POST", _) => {
            write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#)
        }
        _ => write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#),
    }
}

fn ok_body() -> String {
    r#"{"ok":true}"#.to_string()
}

#[derive(Deserialize)]
struct PasswordBody {
    password: String,
}

#[derive(Deserialize)]
struct NameBody {
    name: String,
}

fn parse_body<T: for<'de> Deserialize<'de>>(request: &HttpRequest) -> Result<T, ControlError> {
    serde_json::from_slice(&request.body)
        .map_err(|e| ControlError::Validation(format!("invalid request body: {}", e)))
}

/// Map a control outcome onto a response. Errors keep their taxonomy:
/// authorization 401, validation 400, conflicts 409, internal 500.
fn respond(stream: &mut TcpStream, outcome: Result<String, ControlError>) -> Result<()> {
    match outcome {
        Ok(body) => write_json_response(stream, 200, &body),
        Err(err) => {
            let (status, code) = match &err {
                ControlError::Authorization => (401, "unauthorized"),
                ControlError::Validation(_) => (400, "validation"),
                ControlError::DuplicateName(_) => (409, "duplicate_name"),
                ControlError::InvalidState(_) => (409, "invalid_state"),
                ControlError::Internal(_) => (500, "internal"),
            };
            if status == 500 {
                log::error!("control operation failed: {}", err);
                write_json_response(stream, status, r#"{"error":"internal"}"#)
            } else {
                let body = serde_json::json!({ "error": code, "message": err.to_string() });
                write_json_response(stream, status, &body.to_string())
            }
        }
    }
}

/// Write the MJPEG stream until the client disconnects or the publisher
/// closes. Each viewer drains at its own pace: always the latest frame,
/// never a backlog.
fn stream_video(
    mut stream: TcpStream,
    publisher: &FramePublisher,
    shutdown: &AtomicBool,
) -> Result<()> {
    let header = "HTTP/1.1 200 OK\r\n\
                  Content-Type: multipart/x-mixed-replace; boundary=frame\r\n\
                  Cache-Control: no-store\r\n\
                  Connection: close\r\n\r\n";
    stream.write_all(header.as_bytes())?;

    let mut last_seq = 0u64;
    loop {
        if shutdown.load(Ordering::SeqCst) || publisher.is_closed() {
            return Ok(());
        }
        let frame = if last_seq == 0 {
            publisher.latest()
        } else {
            publisher.wait_newer(last_seq, STREAM_POLL_INTERVAL)
        };
        let Some(frame) = frame else {
            if last_seq == 0 {
                // No frame published yet; wait for the first one.
                std::thread::sleep(Duration::from_millis(50));
            }
            continue;
        };
        if frame.seq == last_seq {
            continue;
        }
        last_seq = frame.seq;

        let part_header = format!(
            "--frame\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
            frame.jpeg.len()
        );
        // A write error just means the viewer went away.
        if stream.write_all(part_header.as_bytes()).is_err()
            || stream.write_all(&frame.jpeg).is_err()
            || stream.write_all(b"\r\n").is_err()
        {
            return Ok(());
        }
    }
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    let header_end = loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break data
                .windows(4)
                .position(|w| w == b"\r\n\r\n")
                .ok_or_else(|| anyhow!("connection closed mid-request"))?;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
    };

    let head = String::from_utf8_lossy(&data[..header_end]).to_string();
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

    let mut body = data[header_end + 4..].to_vec();
    let content_length: usize = headers
        .get("content-length")
        .map(|v| v.parse())
        .transpose()
        .map_err(|_| anyhow!("invalid content-length"))?
        .unwrap_or(0);
    if content_length > MAX_REQUEST_BYTES {
        return Err(anyhow!("request body too large"));
    }
    while body.len() < content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed mid-body"));
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(content_length);

    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        body,
    })
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        401 => "HTTP/1.1 401 Unauthorized",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        409 => "HTTP/1.1 409 Conflict",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    body: Vec<u8>,
}
