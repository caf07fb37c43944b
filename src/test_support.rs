use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedRequest {
    pub path: String,
    pub range_start: Option<u64>,
}

#[derive(Default)]
struct ServerState {
    running: AtomicBool,
    ignore_range: AtomicBool,
    omit_length: AtomicBool,
    files: Mutex<HashMap<String, Vec<u8>>>,
    throttle: Mutex<Option<(usize, Duration)>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

/// Loopback HTTP server serving in-memory files with `Range` support.
pub struct TestServer {
    state: Arc<ServerState>,
    port: u16,
}

impl TestServer {
    pub fn start() -> Self {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind test server");
        listener
            .set_nonblocking(true)
            .expect("nonblocking test listener");
        let port = listener.local_addr().expect("test server addr").port();
        let state = Arc::new(ServerState::default());
        state.running.store(true, Ordering::SeqCst);
        let loop_state = Arc::clone(&state);
        thread::spawn(move || serve_loop(listener, loop_state));
        Self { state, port }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }

    pub fn add_file(&self, path: &str, body: Vec<u8>) {
        lock(&self.state.files).insert(path.to_string(), body);
    }

    /// Sends `block` bytes at a time, sleeping `delay` between blocks.
    pub fn throttle(&self, block: usize, delay: Duration) {
        *lock(&self.state.throttle) = Some((block.max(1), delay));
    }

    pub fn ignore_range(&self, value: bool) {
        self.state.ignore_range.store(value, Ordering::SeqCst);
    }

    pub fn omit_content_length(&self, value: bool) {
        self.state.omit_length.store(value, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.state.requests).clone()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.state.running.store(false, Ordering::SeqCst);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn serve_loop(listener: TcpListener, state: Arc<ServerState>) {
    while state.running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                let state = Arc::clone(&state);
                thread::spawn(move || {
                    let _ = handle_connection(stream, &state);
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(5));
            }
            Err(_) => thread::sleep(Duration::from_millis(20)),
        }
    }
}

fn handle_connection(mut stream: TcpStream, state: &ServerState) -> std::io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(Duration::from_secs(4)))?;

    let (request_line, headers) = match read_request_head(&stream)? {
        Some(head) => head,
        None => return Ok(()),
    };
    let mut parts = request_line.split_whitespace();
    let _method = parts.next().unwrap_or("");
    let path = parts.next().unwrap_or("/").to_string();
    let range_start = headers
        .get("range")
        .and_then(|value| value.trim().strip_prefix("bytes="))
        .and_then(|value| value.split('-').next())
        .and_then(|value| value.trim().parse::<u64>().ok());
    lock(&state.requests).push(RecordedRequest {
        path: path.clone(),
        range_start,
    });

    let body = match lock(&state.files).get(&path).cloned() {
        Some(body) => body,
        None => return write_status(&mut stream, 404, "Not Found"),
    };
    let total = body.len() as u64;

    let (status, start) = match range_start {
        Some(start) if !state.ignore_range.load(Ordering::SeqCst) => {
            if start >= total {
                let response = format!(
                    "HTTP/1.1 416 Range Not Satisfiable\r\nContent-Range: bytes */{total}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                );
                stream.write_all(response.as_bytes())?;
                return stream.flush();
            }
            ("206 Partial Content", start)
        }
        _ => ("200 OK", 0),
    };

    let slice = &body[start as usize..];
    let mut head = format!("HTTP/1.1 {status}\r\nContent-Type: application/octet-stream\r\nConnection: close\r\n");
    if !state.omit_length.load(Ordering::SeqCst) {
        head.push_str(&format!("Content-Length: {}\r\n", slice.len()));
    }
    if start > 0 {
        head.push_str(&format!(
            "Content-Range: bytes {}-{}/{}\r\n",
            start,
            total.saturating_sub(1),
            total
        ));
    }
    head.push_str("\r\n");
    stream.write_all(head.as_bytes())?;

    let throttle = *lock(&state.throttle);
    match throttle {
        Some((block, delay)) => {
            for part in slice.chunks(block) {
                stream.write_all(part)?;
                stream.flush()?;
                thread::sleep(delay);
            }
        }
        None => stream.write_all(slice)?,
    }
    stream.flush()
}

fn read_request_head(
    stream: &TcpStream,
) -> std::io::Result<Option<(String, HashMap<String, String>)>> {
    let clone = stream.try_clone()?;
    let mut reader = BufReader::new(clone);
    let mut first_line = String::new();
    if reader.read_line(&mut first_line)? == 0 {
        return Ok(None);
    }

    let mut headers = HashMap::new();
    for _ in 0..64 {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 || line == "\r\n" || line == "\n" {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }
    Ok(Some((first_line, headers)))
}

fn write_status(stream: &mut TcpStream, code: u16, status: &str) -> std::io::Result<()> {
    let response =
        format!("HTTP/1.1 {code} {status}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
    stream.write_all(response.as_bytes())?;
    stream.flush()
}
