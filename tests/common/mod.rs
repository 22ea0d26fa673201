//! A tiny line-protocol bucket store and a backend that talks to it over TCP.
//!
//! Requests are one line each (`CREATE <name> <location>`, `HEAD <name>`, `DELETE <name>`); the
//! store replies with one word. Every backend call opens a fresh connection, so traffic can be
//! routed through a fault proxy.
#![allow(dead_code)]

use async_trait::async_trait;
use bucketwise::{
    BackendError, BucketBackend, BucketName, CreateStatus, HeadStatus, LocationHint,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// Handle on a running store.
#[derive(Clone)]
pub struct StubStore {
    pub addr: SocketAddr,
    buckets: Arc<Mutex<HashMap<String, String>>>,
}

impl StubStore {
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let buckets = Arc::new(Mutex::new(HashMap::new()));
        let shared = Arc::clone(&buckets);
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let buckets = Arc::clone(&shared);
                tokio::spawn(serve(socket, buckets));
            }
        });
        Self { addr, buckets }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.buckets.lock().unwrap().contains_key(name)
    }
}

async fn serve(socket: TcpStream, buckets: Arc<Mutex<HashMap<String, String>>>) {
    let (read, mut write) = socket.into_split();
    let mut lines = BufReader::new(read).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let reply = respond(&line, &buckets);
        if write.write_all(format!("{reply}\n").as_bytes()).await.is_err() {
            return;
        }
    }
}

fn respond(line: &str, buckets: &Mutex<HashMap<String, String>>) -> &'static str {
    let mut parts = line.split_whitespace();
    let mut buckets = buckets.lock().unwrap();
    match (parts.next(), parts.next()) {
        (Some("CREATE"), Some(name)) => {
            if buckets.contains_key(name) {
                "OWNED"
            } else {
                buckets.insert(name.to_string(), parts.next().unwrap_or_default().to_string());
                "CREATED"
            }
        }
        (Some("HEAD"), Some(name)) if buckets.contains_key(name) => "EXISTS",
        (Some("HEAD"), Some(_)) => "MISSING",
        (Some("DELETE"), Some(name)) => match buckets.remove(name) {
            Some(_) => "OK",
            None => "MISSING",
        },
        _ => "BAD",
    }
}

/// Backend speaking the store's protocol, one connection per call.
#[derive(Debug, Clone)]
pub struct LineBackend {
    addr: SocketAddr,
}

impl LineBackend {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    async fn request(&self, line: String) -> Result<String, BackendError> {
        let transient = |e: std::io::Error| BackendError::transient(e.to_string()).with_source(e);
        let mut stream = TcpStream::connect(self.addr).await.map_err(transient)?;
        stream.write_all(line.as_bytes()).await.map_err(transient)?;

        let mut reply = String::new();
        BufReader::new(stream).read_line(&mut reply).await.map_err(transient)?;
        if reply.is_empty() {
            return Err(BackendError::transient("connection closed before reply"));
        }
        Ok(reply.trim().to_string())
    }
}

#[async_trait]
impl BucketBackend for LineBackend {
    async fn create(
        &self,
        name: &BucketName,
        location: &LocationHint,
    ) -> Result<CreateStatus, BackendError> {
        match self.request(format!("CREATE {name} {location}\n")).await?.as_str() {
            "CREATED" => Ok(CreateStatus::Created),
            "OWNED" => Ok(CreateStatus::AlreadyOwned),
            other => Err(BackendError::other(format!("unexpected reply {other:?}"))),
        }
    }

    async fn head(&self, name: &BucketName) -> Result<HeadStatus, BackendError> {
        match self.request(format!("HEAD {name}\n")).await?.as_str() {
            "EXISTS" => Ok(HeadStatus::Exists),
            "MISSING" => Ok(HeadStatus::NotFound),
            other => Err(BackendError::other(format!("unexpected reply {other:?}"))),
        }
    }

    async fn delete(&self, name: &BucketName) -> Result<(), BackendError> {
        match self.request(format!("DELETE {name}\n")).await?.as_str() {
            "OK" => Ok(()),
            "MISSING" => Err(BackendError::not_found(format!("bucket {name} does not exist"))),
            other => Err(BackendError::other(format!("unexpected reply {other:?}"))),
        }
    }
}
