#![allow(dead_code)]

use async_trait::async_trait;
use proxy_broker::{
    Broker, BrokerConfig, CheckerConfig, Provider, ProviderQuery, ProviderRegistry, ProxyCandidate,
};
use reqwest::Client;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Address the checker believes is ours
pub const ORIGIN_IP: &str = "203.0.113.7";

/// Address the fake proxies present to the judge
pub const EXIT_IP: &str = "198.51.100.20";

/// What the fake proxy's judge answers
#[derive(Debug, Clone, Copy)]
pub enum JudgeBehaviour {
    Elite,
    Anonymous,
    Transparent,
    NotAJudge,
}

impl JudgeBehaviour {
    fn body(self) -> String {
        match self {
            JudgeBehaviour::Elite => serde_json::json!({
                "origin": EXIT_IP,
                "headers": {"Host": "127.0.0.1:9", "Accept": "*/*"},
            })
            .to_string(),
            JudgeBehaviour::Anonymous => serde_json::json!({
                "origin": EXIT_IP,
                "headers": {"Host": "127.0.0.1:9", "Via": "1.1 fake-proxy"},
            })
            .to_string(),
            JudgeBehaviour::Transparent => serde_json::json!({
                "origin": format!("{}, {}", ORIGIN_IP, EXIT_IP),
                "headers": {"Host": "127.0.0.1:9", "X-Forwarded-For": ORIGIN_IP},
            })
            .to_string(),
            JudgeBehaviour::NotAJudge => "<html><body>captive portal</body></html>".to_string(),
        }
    }
}

/// Local proxy that speaks HTTP forwarding, CONNECT, SOCKS4 and SOCKS5,
/// and plays the judge itself instead of dialing out
pub async fn spawn_fake_proxy(behaviour: JudgeBehaviour) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        loop {
            if let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let _ = serve(socket, behaviour).await;
                });
            }
        }
    });

    port
}

/// Local proxy that accepts connections and never answers
pub async fn spawn_silent_proxy() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let mut held = Vec::new();
        loop {
            if let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        }
    });

    port
}

/// Open-connection counter shared by counting proxies
#[derive(Debug, Default)]
pub struct ConnectionGauge {
    open: AtomicUsize,
    peak: AtomicUsize,
    total: AtomicUsize,
}

impl ConnectionGauge {
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        let open = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(open, Ordering::SeqCst);
        self.total.fetch_add(1, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Elite HTTP proxy that holds every request for `hold` and records how
/// many connections are open at once
pub async fn spawn_counting_proxy(gauge: Arc<ConnectionGauge>, hold: Duration) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        loop {
            if let Ok((mut socket, _)) = listener.accept().await {
                let gauge = Arc::clone(&gauge);
                tokio::spawn(async move {
                    gauge.enter();
                    let _ = read_head(&mut socket).await;
                    tokio::time::sleep(hold).await;
                    let _ = respond_judge(&mut socket, JudgeBehaviour::Elite).await;
                    gauge.leave();
                });
            }
        }
    });

    port
}

/// A port with nothing listening on it
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn serve(mut socket: TcpStream, behaviour: JudgeBehaviour) -> std::io::Result<()> {
    let mut first = [0u8; 1];
    socket.read_exact(&mut first).await?;

    match first[0] {
        0x04 => {
            // command, port, address, then a NUL-terminated user id
            let mut fixed = [0u8; 7];
            socket.read_exact(&mut fixed).await?;
            let mut byte = [0u8; 1];
            loop {
                socket.read_exact(&mut byte).await?;
                if byte[0] == 0 {
                    break;
                }
            }
            socket.write_all(&[0x00, 0x5A, 0, 0, 0, 0, 0, 0]).await?;
            read_head(&mut socket).await?;
            respond_judge(&mut socket, behaviour).await
        }
        0x05 => {
            let mut count = [0u8; 1];
            socket.read_exact(&mut count).await?;
            let mut methods = vec![0u8; count[0] as usize];
            socket.read_exact(&mut methods).await?;
            socket.write_all(&[0x05, 0x00]).await?;

            let mut request = [0u8; 4];
            socket.read_exact(&mut request).await?;
            let address_len = match request[3] {
                0x01 => 4,
                0x04 => 16,
                _ => {
                    let mut len = [0u8; 1];
                    socket.read_exact(&mut len).await?;
                    len[0] as usize
                }
            };
            let mut rest = vec![0u8; address_len + 2];
            socket.read_exact(&mut rest).await?;
            socket
                .write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
                .await?;
            read_head(&mut socket).await?;
            respond_judge(&mut socket, behaviour).await
        }
        other => {
            let mut head = vec![other];
            head.extend(read_head(&mut socket).await?);
            let text = String::from_utf8_lossy(&head).into_owned();

            if let Some(line) = text.strip_prefix("CONNECT ") {
                let target = line.split_whitespace().next().unwrap_or_default().to_string();
                socket
                    .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
                    .await?;
                if target.ends_with(":25") {
                    socket.write_all(b"220 fake.smtp.test ESMTP ready\r\n").await?;
                    return Ok(());
                }
                read_head(&mut socket).await?;
            }
            respond_judge(&mut socket, behaviour).await
        }
    }
}

async fn read_head(socket: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if socket.read(&mut byte).await? == 0 {
            break;
        }
        head.push(byte[0]);
    }
    Ok(head)
}

async fn respond_judge(socket: &mut TcpStream, behaviour: JudgeBehaviour) -> std::io::Result<()> {
    let body = behaviour.body();
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    socket.write_all(response.as_bytes()).await?;
    socket.shutdown().await
}

/// Provider serving a fixed list, optionally after a delay
pub struct StaticProvider {
    name: String,
    candidates: Vec<ProxyCandidate>,
    delay: Duration,
    calls: Arc<AtomicUsize>,
    queries: Arc<Mutex<Vec<ProviderQuery>>>,
}

impl StaticProvider {
    pub fn new(name: &str, ports: &[u16]) -> Self {
        let candidates = ports
            .iter()
            .map(|port| ProxyCandidate::new("127.0.0.1", *port, name))
            .collect();
        Self::from_candidates(name, candidates)
    }

    pub fn from_candidates(name: &str, candidates: Vec<ProxyCandidate>) -> Self {
        Self {
            name: name.to_string(),
            candidates,
            delay: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
            queries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Shared counter of `fetch` calls
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    /// Every query the provider was called with
    pub fn queries(&self) -> Arc<Mutex<Vec<ProviderQuery>>> {
        Arc::clone(&self.queries)
    }
}

#[async_trait]
impl Provider for StaticProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn url(&self) -> &str {
        "memory://static"
    }

    async fn fetch(&self, _client: &Client, query: &ProviderQuery) -> proxy_broker::Result<Vec<ProxyCandidate>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().unwrap().push(query.clone());
        tokio::time::sleep(self.delay).await;
        Ok(self
            .candidates
            .iter()
            .filter(|c| query.accepts_country(c.country.as_deref()))
            .cloned()
            .collect())
    }
}

pub fn checker_config() -> CheckerConfig {
    let origin: IpAddr = ORIGIN_IP.parse().unwrap();
    CheckerConfig::new()
        .with_probe_timeout(Duration::from_secs(2))
        .with_judge_url("http://127.0.0.1:9/get".to_string())
        .with_judge_post_url("http://127.0.0.1:9/post".to_string())
        .with_smtp("127.0.0.1".to_string(), 25)
        .with_origin_ip(origin)
}

pub fn registry_of(providers: Vec<StaticProvider>) -> ProviderRegistry {
    let mut registry = ProviderRegistry::empty();
    for provider in providers {
        registry.register(provider);
    }
    registry
}

pub fn broker_config() -> BrokerConfig {
    BrokerConfig::new()
        .with_checker(checker_config())
        .with_grab_timeout(Duration::from_secs(2))
}

pub fn broker_with(registry: ProviderRegistry) -> Broker {
    Broker::with_config(registry, broker_config()).unwrap()
}
