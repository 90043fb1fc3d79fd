//! In-process tracker and storage node for tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mogile_core::protocol::{decode_fields, encode_response};
use mogile_core::{Fields, Response, TrackerAddr};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

type Handler = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Tracker that answers each request line with `handler(line)`.
/// `None` keeps the connection open without replying.
pub struct MockTracker {
    addr: TrackerAddr,
    requests: Arc<Mutex<Vec<String>>>,
}

impl MockTracker {
    pub async fn start(handler: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        Self::start_with_delay(Duration::ZERO, handler).await
    }

    /// Like [`MockTracker::start`], but each reply is held back for `delay`.
    pub async fn start_with_delay(
        delay: Duration,
        handler: impl Fn(&str) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let handler: Handler = Arc::new(handler);
        let seen = requests.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let handler = handler.clone();
                let seen = seen.clone();
                tokio::spawn(serve_tracker(stream, handler, seen, delay));
            }
        });
        Self {
            addr: TrackerAddr::new("127.0.0.1", port),
            requests,
        }
    }

    pub fn addr(&self) -> TrackerAddr {
        self.addr.clone()
    }

    /// Request lines received so far, without the trailing newline.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests as (verb, args).
    pub fn commands(&self) -> Vec<(String, Fields)> {
        self.requests().iter().map(|l| parse_request(l)).collect()
    }
}

async fn serve_tracker(
    mut stream: TcpStream,
    handler: Handler,
    seen: Arc<Mutex<Vec<String>>>,
    delay: Duration,
) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if buf.contains(&b'\n') {
                    break;
                }
            }
        }
    }
    let line = String::from_utf8_lossy(&buf).trim_end().to_string();
    seen.lock().unwrap().push(line.clone());
    match handler(&line) {
        Some(reply) => {
            tokio::time::sleep(delay).await;
            let _ = stream.write_all(reply.as_bytes()).await;
            let _ = stream.shutdown().await;
        }
        None => tokio::time::sleep(Duration::from_secs(3600)).await,
    }
}

/// Split a request line into verb and decoded args.
pub fn parse_request(line: &str) -> (String, Fields) {
    let (verb, query) = line.split_once(' ').unwrap_or((line, ""));
    (verb.to_string(), decode_fields(query))
}

/// Address with nothing listening on it.
pub async fn refused_addr() -> TrackerAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    TrackerAddr::new("127.0.0.1", port)
}

/// Base URL of a storage node that accepts connections and never answers.
pub async fn stalled_storage() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let _held = stream;
                tokio::time::sleep(Duration::from_secs(3600)).await;
            });
        }
    });
    base
}

/// Minimal HTTP storage node: PUT stores a body, GET serves it in small pieces.
#[derive(Clone)]
pub struct MockStorage {
    base: String,
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MockStorage {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let files = Arc::new(Mutex::new(HashMap::new()));
        let shared = files.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve_http(stream, shared.clone()));
            }
        });
        Self { base, files }
    }

    /// Full URL for a storage path such as `/dev1/0/000/000/0000000001.fid`.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub fn put(&self, path: &str, body: Vec<u8>) {
        self.files.lock().unwrap().insert(path.to_string(), body);
    }

    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(path).cloned()
    }
}

async fn serve_http(mut stream: TcpStream, files: Arc<Mutex<HashMap<String, Vec<u8>>>>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    let (method, path, header_len, content_length) = loop {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
        let mut headers = [httparse::EMPTY_HEADER; 32];
        let mut req = httparse::Request::new(&mut headers);
        if let Ok(httparse::Status::Complete(len)) = req.parse(&buf) {
            let content_length = req
                .headers
                .iter()
                .find(|h| h.name.eq_ignore_ascii_case("Content-Length"))
                .and_then(|h| std::str::from_utf8(h.value).ok())
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            break (
                req.method.unwrap_or("").to_string(),
                req.path.unwrap_or("/").to_string(),
                len,
                content_length,
            );
        }
    };

    match method.as_str() {
        "PUT" => {
            let mut body = buf[header_len..].to_vec();
            while body.len() < content_length {
                match stream.read(&mut chunk).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => body.extend_from_slice(&chunk[..n]),
                }
            }
            files.lock().unwrap().insert(path, body);
            let _ = stream
                .write_all(b"HTTP/1.1 201 Created\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                .await;
        }
        "GET" => {
            let body = files.lock().unwrap().get(&path).cloned();
            let Some(body) = body else {
                let _ = stream
                    .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                    .await;
                return;
            };
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            let _ = stream.write_all(head.as_bytes()).await;
            for piece in body.chunks(4096) {
                if stream.write_all(piece).await.is_err() {
                    return;
                }
                let _ = stream.flush().await;
            }
        }
        _ => {
            let _ = stream
                .write_all(b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                .await;
        }
    }
    let _ = stream.shutdown().await;
}

/// `OK` reply line with the given fields.
pub fn ok_reply(pairs: &[(&str, &str)]) -> String {
    let fields = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    encode_response(&Response::Ok(fields))
}

/// Tracker plus storage node with a real key table: `CREATE_OPEN` hands out a
/// storage path, `CREATE_CLOSE` binds the key, and `GET_PATHS`, `RENAME`,
/// `DELETE` and `LIST_KEYS` consult it.
pub struct MockCluster {
    pub tracker: MockTracker,
    pub storage: MockStorage,
    keys: Arc<Mutex<BTreeMap<(String, String), String>>>,
}

impl MockCluster {
    pub async fn start() -> Self {
        let storage = MockStorage::start().await;
        let keys: Arc<Mutex<BTreeMap<(String, String), String>>> = Arc::default();
        let next_fid = AtomicU64::new(1);
        let (st, table) = (storage.clone(), keys.clone());
        let tracker = MockTracker::start(move |line| {
            let (verb, args) = parse_request(line);
            let arg = |name: &str| args.get(name).cloned().unwrap_or_default();
            let domain = arg("domain");
            let mut table = table.lock().unwrap();
            let reply = match verb.as_str() {
                "CREATE_OPEN" => {
                    let fid = next_fid.fetch_add(1, Ordering::SeqCst);
                    let url = st.url(&format!("/dev1/0/000/000/{fid:010}.fid"));
                    ok_reply(&[
                        ("devid", "1"),
                        ("fid", fid.to_string().as_str()),
                        ("path", url.as_str()),
                    ])
                }
                "CREATE_CLOSE" => {
                    table.insert((domain, arg("key")), arg("path"));
                    ok_reply(&[])
                }
                "GET_PATHS" => match table.get(&(domain, arg("key"))) {
                    Some(url) => ok_reply(&[("paths", "1"), ("path1", url.as_str())]),
                    None => "ERR unknown_key unknown_key\r\n".to_string(),
                },
                "DELETE" => match table.remove(&(domain, arg("key"))) {
                    Some(_) => ok_reply(&[]),
                    None => "ERR unknown_key unknown_key\r\n".to_string(),
                },
                "RENAME" => match table.remove(&(domain.clone(), arg("from_key"))) {
                    Some(url) => {
                        table.insert((domain, arg("to_key")), url);
                        ok_reply(&[])
                    }
                    None => "ERR unknown_key unknown_key\r\n".to_string(),
                },
                "LIST_KEYS" => {
                    let prefix = arg("prefix");
                    let found: Vec<String> = table
                        .keys()
                        .filter(|(d, k)| *d == domain && k.starts_with(&prefix))
                        .map(|(_, k)| k.clone())
                        .collect();
                    let mut pairs = vec![("key_count".to_string(), found.len().to_string())];
                    for (i, k) in found.iter().enumerate() {
                        pairs.push((format!("key_{}", i + 1), k.clone()));
                    }
                    encode_response(&Response::Ok(pairs.into_iter().collect()))
                }
                _ => ok_reply(&[]),
            };
            Some(reply)
        })
        .await;
        Self {
            tracker,
            storage,
            keys,
        }
    }

    /// Keys currently bound in `domain`, sorted.
    pub fn keys(&self, domain: &str) -> Vec<String> {
        self.keys
            .lock()
            .unwrap()
            .keys()
            .filter(|(d, _)| d == domain)
            .map(|(_, k)| k.clone())
            .collect()
    }

    /// Bytes stored under `key`, read back from the storage node.
    pub fn contents(&self, domain: &str, key: &str) -> Option<Vec<u8>> {
        let url = self
            .keys
            .lock()
            .unwrap()
            .get(&(domain.to_string(), key.to_string()))
            .cloned()?;
        let path = url.strip_prefix(&self.storage.url(""))?.to_string();
        self.storage.get(&path)
    }
}
