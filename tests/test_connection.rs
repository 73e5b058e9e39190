mod common;

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::TempDir;
use filament::config::Config;
use filament::http::body::BodyReader;
use filament::http::connection::ConnectionStats;
use filament::http::reply::Reply;
use filament::http::request::Request;
use filament::http::route::{Matcher, Route};
use filament::server::Server;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

struct Running {
    addr: SocketAddr,
    stats: Arc<ConnectionStats>,
    stop: oneshot::Sender<()>,
    task: JoinHandle<anyhow::Result<()>>,
}

impl Running {
    async fn connect(&self) -> TcpStream {
        TcpStream::connect(self.addr).await.unwrap()
    }

    async fn shutdown(self) {
        let _ = self.stop.send(());
        self.task.await.unwrap().unwrap();
    }
}

async fn start(root: &TempDir, routes: Vec<Route>) -> Running {
    let cfg = Config::new(root.path());
    let server = Server::bind(&cfg, routes).await.unwrap();
    let addr = server.http_addr().unwrap();
    let stats = server.stats();
    let (stop, stopped) = oneshot::channel::<()>();
    let task = tokio::spawn(server.run(async {
        let _ = stopped.await;
    }));
    Running {
        addr,
        stats,
        stop,
        task,
    }
}

fn hi_route() -> Route {
    Route::get("/hi", |_req: &mut Request, reply: &mut Reply, _body: &mut BodyReader<'_>| {
        reply.content = b"hi!".to_vec();
    })
    .unwrap()
}

fn echo_route() -> Route {
    Route::new(
        Matcher::pattern("POST", "/echo").unwrap(),
        |req: &mut Request, reply: &mut Reply, body: &mut BodyReader<'_>| {
            if let Ok(bytes) = req.read_body(body) {
                reply.content = bytes.to_vec();
            }
        },
    )
}

fn header<'a>(head: &'a str, name: &str) -> Option<&'a str> {
    head.lines().find_map(|line| {
        let (key, value) = line.split_once(": ")?;
        key.eq_ignore_ascii_case(name).then_some(value)
    })
}

async fn read_response(stream: &mut TcpStream) -> (String, Vec<u8>) {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        let n = stream.read(&mut byte).await.unwrap();
        assert_eq!(n, 1, "connection closed mid-response");
        head.push(byte[0]);
    }
    let head = String::from_utf8(head).unwrap();
    let len: usize = header(&head, "Content-Length")
        .map(|v| v.parse().unwrap())
        .unwrap_or(0);
    let mut body = vec![0; len];
    stream.read_exact(&mut body).await.unwrap();
    (head, body)
}

async fn assert_closed(stream: &mut TcpStream) {
    let mut rest = Vec::new();
    let n = stream.read_to_end(&mut rest).await.unwrap_or(0);
    assert_eq!(n, 0, "unexpected bytes after close: {rest:?}");
}

#[tokio::test]
async fn test_route_reply_then_close() {
    let root = TempDir::new("c-route");
    let server = start(&root, vec![hi_route()]).await;
    let mut stream = server.connect().await;

    stream
        .write_all(b"GET /hi HTTP/1.1\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let (head, body) = read_response(&mut stream).await;

    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(header(&head, "Connection"), Some("Close"));
    assert_eq!(header(&head, "Content-Length"), Some("3"));
    assert_eq!(body, b"hi!");
    assert_closed(&mut stream).await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_missing_file_keeps_connection_open() {
    let root = TempDir::new("c-missing");
    let server = start(&root, vec![hi_route()]).await;
    let mut stream = server.connect().await;

    stream
        .write_all(b"GET /missing.txt HTTP/1.1\r\n\r\n")
        .await
        .unwrap();
    let (head, body) = read_response(&mut stream).await;

    assert!(head.starts_with("HTTP/1.1 404 Not Found\r\n"));
    assert_eq!(header(&head, "Connection"), Some("Keep-Alive"));
    assert_eq!(
        body,
        b"<html><head><title>Not Found</title></head><body><h1>404 Not Found</h1></body></html>"
    );

    stream.write_all(b"GET /hi HTTP/1.1\r\n\r\n").await.unwrap();
    let (head, body) = read_response(&mut stream).await;
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(body, b"hi!");

    server.shutdown().await;
}

#[tokio::test]
async fn test_keep_alive_requests_start_fresh() {
    let root = TempDir::new("c-fresh");
    let mode = Route::get("/mode", |req: &mut Request, reply: &mut Reply, _body: &mut BodyReader<'_>| {
        let mode = req.header("X-Mode").unwrap_or("none").to_string();
        reply.content = format!("{mode} {}", req.headers.len()).into_bytes();
    })
    .unwrap();
    let server = start(&root, vec![mode]).await;
    let mut stream = server.connect().await;

    stream
        .write_all(b"GET /mode HTTP/1.1\r\nX-Mode: first\r\nX-Extra: 1\r\n\r\n")
        .await
        .unwrap();
    let (_, first) = read_response(&mut stream).await;
    stream.write_all(b"GET /mode HTTP/1.1\r\n\r\n").await.unwrap();
    let (_, second) = read_response(&mut stream).await;

    assert_eq!(first, b"first 2");
    assert_eq!(second, b"none 0");

    server.shutdown().await;
}

#[tokio::test]
async fn test_pipelined_requests_in_one_write() {
    let root = TempDir::new("c-pipeline");
    let server = start(&root, vec![hi_route()]).await;
    let mut stream = server.connect().await;

    stream
        .write_all(b"GET /hi HTTP/1.1\r\n\r\nGET /nope HTTP/1.1\r\n\r\nGET /hi HTTP/1.1\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();

    let (first, _) = read_response(&mut stream).await;
    let (second, _) = read_response(&mut stream).await;
    let (third, body) = read_response(&mut stream).await;

    assert!(first.starts_with("HTTP/1.1 200"));
    assert!(second.starts_with("HTTP/1.1 404"));
    assert!(third.starts_with("HTTP/1.1 200"));
    assert_eq!(body, b"hi!");
    assert_closed(&mut stream).await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_static_file_sent_whole() {
    let root = TempDir::new("c-static");
    let contents: Vec<u8> = (0..1_000_000u32).map(|i| (i % 251) as u8).collect();
    root.write("blob.bin", &contents);
    let server = start(&root, Vec::new()).await;
    let mut stream = server.connect().await;

    stream
        .write_all(b"GET /blob.bin HTTP/1.1\r\n\r\n")
        .await
        .unwrap();
    let (head, body) = read_response(&mut stream).await;

    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(header(&head, "Content-Length"), Some("1000000"));
    assert_eq!(body, contents);

    // The connection stays usable after a sendfile body.
    stream
        .write_all(b"GET /blob.bin HTTP/1.1\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let (_, again) = read_response(&mut stream).await;
    assert_eq!(again.len(), contents.len());

    server.shutdown().await;
}

#[tokio::test]
async fn test_route_reads_body_arriving_later() {
    let root = TempDir::new("c-body");
    let server = start(&root, vec![echo_route()]).await;
    let mut stream = server.connect().await;

    stream
        .write_all(b"POST /echo HTTP/1.1\r\nContent-Length: 10\r\n\r\nping")
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    stream.write_all(b"-pong!").await.unwrap();

    let (head, body) = read_response(&mut stream).await;
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(body, b"ping-pong!");

    server.shutdown().await;
}

#[tokio::test]
async fn test_unread_body_is_drained_before_next_request() {
    let root = TempDir::new("c-drain");
    root.write("index.html", "<p>home</p>");
    let server = start(&root, vec![hi_route()]).await;
    let mut stream = server.connect().await;

    let body = vec![b'x'; 100_000];
    let mut request = b"POST /index.html HTTP/1.1\r\nContent-Length: 100000\r\n\r\n".to_vec();
    request.extend_from_slice(&body);
    request.extend_from_slice(b"GET /hi HTTP/1.1\r\n\r\n");

    let (writer_result, first, second) = {
        let (mut reader, mut writer) = stream.split();
        let write = async { writer.write_all(&request).await };
        let read = async {
            let mut tmp = TcpStreamReader(&mut reader);
            let first = tmp.response().await;
            let second = tmp.response().await;
            (first, second)
        };
        let (w, (a, b)) = tokio::join!(write, read);
        (w, a, b)
    };

    writer_result.unwrap();
    assert!(first.0.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(first.1, b"<p>home</p>");
    assert_eq!(second.1, b"hi!");

    server.shutdown().await;
}

/// Reads responses from the read half of a split stream.
struct TcpStreamReader<'a, 'b>(&'a mut tokio::net::tcp::ReadHalf<'b>);

impl TcpStreamReader<'_, '_> {
    async fn response(&mut self) -> (String, Vec<u8>) {
        let mut head = Vec::new();
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            let n = self.0.read(&mut byte).await.unwrap();
            assert_eq!(n, 1, "connection closed mid-response");
            head.push(byte[0]);
        }
        let head = String::from_utf8(head).unwrap();
        let len: usize = header(&head, "Content-Length")
            .map(|v| v.parse().unwrap())
            .unwrap_or(0);
        let mut body = vec![0; len];
        self.0.read_exact(&mut body).await.unwrap();
        (head, body)
    }
}

#[tokio::test]
async fn test_malformed_request_gets_400_and_close() {
    let root = TempDir::new("c-malformed");
    let server = start(&root, Vec::new()).await;
    let mut stream = server.connect().await;

    stream.write_all(b"G\x01T / HTTP/1.1\r\n\r\n").await.unwrap();
    let (head, _) = read_response(&mut stream).await;

    assert!(head.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    assert_eq!(header(&head, "Connection"), Some("Close"));
    assert_closed(&mut stream).await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_request_split_across_many_writes() {
    let root = TempDir::new("c-split");
    let server = start(&root, vec![hi_route()]).await;
    let mut stream = server.connect().await;

    for piece in [&b"GE"[..], b"T /h", b"i HTTP/1", b".1\r\nConn", b"ection: close\r", b"\n\r\n"] {
        stream.write_all(piece).await.unwrap();
        stream.flush().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    let (_, body) = read_response(&mut stream).await;

    assert_eq!(body, b"hi!");
    server.shutdown().await;
}

#[tokio::test]
async fn test_stats_count_connections_and_requests() {
    let root = TempDir::new("c-stats");
    let server = start(&root, vec![hi_route()]).await;

    for _ in 0..2 {
        let mut stream = server.connect().await;
        stream
            .write_all(b"GET /hi HTTP/1.1\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        read_response(&mut stream).await;
        assert_closed(&mut stream).await;
    }

    assert!(common::wait_for(|| server.stats.active_connections.load(Ordering::Relaxed) == 0));
    assert_eq!(server.stats.connections_accepted.load(Ordering::Relaxed), 2);
    assert_eq!(server.stats.requests_processed.load(Ordering::Relaxed), 2);

    server.shutdown().await;
}

#[tokio::test]
async fn test_huge_declared_body_with_early_close_is_survived() {
    let root = TempDir::new("c-huge-body");
    let server = start(&root, vec![echo_route(), hi_route()]).await;

    let mut stream = server.connect().await;
    stream
        .write_all(b"POST /echo HTTP/1.1\r\nContent-Length: 99999999999999\r\n\r\nabc")
        .await
        .unwrap();
    stream.shutdown().await.unwrap();
    let mut rest = Vec::new();
    let _ = stream.read_to_end(&mut rest).await;

    // The server is still up and serving.
    let mut stream = server.connect().await;
    stream
        .write_all(b"GET /hi HTTP/1.1\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let (_, body) = read_response(&mut stream).await;
    assert_eq!(body, b"hi!");

    server.shutdown().await;
}

#[tokio::test]
async fn test_double_slash_path_does_not_leave_root() {
    let root = TempDir::new("c-double-slash");
    let server = start(&root, Vec::new()).await;
    let mut stream = server.connect().await;

    stream
        .write_all(b"GET //etc/passwd HTTP/1.1\r\n\r\nGET /%2Fetc/passwd HTTP/1.1\r\n\r\n")
        .await
        .unwrap();
    let (first, _) = read_response(&mut stream).await;
    let (second, _) = read_response(&mut stream).await;

    assert!(first.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    assert!(second.starts_with("HTTP/1.1 400 Bad Request\r\n"));

    server.shutdown().await;
}
