//! End-to-end tests against a real listener on an ephemeral port

use futures_util::{SinkExt, StreamExt};
use pulse_core::{Server, ServerConfig};
use std::net::SocketAddr;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

struct TestServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<pulse_core::Result<()>>,
    _root: TempDir,
}

impl TestServer {
    async fn start() -> Self {
        // Assets live one level below a file that must stay unreachable
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("secret.txt"), "top secret").unwrap();
        let assets = root.path().join("public");
        std::fs::create_dir_all(assets.join("css")).unwrap();
        std::fs::write(assets.join("index.html"), "<h1>chat</h1>").unwrap();
        std::fs::write(assets.join("css/app.css"), "body{}").unwrap();
        std::fs::write(assets.join("my file.txt"), "spaced").unwrap();

        let config = ServerConfig {
            hostname: "127.0.0.1".into(),
            port: 0,
            workers: 2,
            assets_dir: assets,
            sse_keep_alive: Duration::ZERO,
            shutdown_timeout: Duration::from_secs(2),
            ..Default::default()
        };
        let server = Server::bind(&config).await.unwrap();
        let addr = server.local_addr().unwrap();

        let (tx, rx) = oneshot::channel();
        let handle = tokio::spawn(server.run(async {
            let _ = rx.await;
        }));

        Self {
            addr,
            shutdown: Some(tx),
            handle,
            _root: root,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn get(&self, path: &str) -> reqwest::Response {
        reqwest::get(self.url(path)).await.unwrap()
    }

    /// Send a request line as-is, bypassing client-side URL normalization
    async fn raw_get(&self, target: &str) -> String {
        let mut stream = TcpStream::connect(self.addr).await.unwrap();
        let request = format!(
            "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
            target
        );
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        String::from_utf8_lossy(&response).into_owned()
    }

    async fn health(&self) -> serde_json::Value {
        let body = self.get("/health").await.text().await.unwrap();
        serde_json::from_str(&body).unwrap()
    }

    /// Poll `/health` until `field` reaches `expected`
    async fn wait_for(&self, field: &str, expected: u64) {
        for _ in 0..200 {
            if self.health().await[field] == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{} never reached {}", field, expected);
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();
    }
}

/// Read an event stream body until `expected` bytes have arrived
async fn read_exactly<S>(body: &mut S, expected: &str) -> String
where
    S: futures_util::Stream<Item = reqwest::Result<bytes::Bytes>> + Unpin,
{
    let mut buf = String::new();
    while buf.len() < expected.len() {
        let chunk = tokio::time::timeout(Duration::from_secs(5), body.next())
            .await
            .expect("timed out waiting for event")
            .expect("stream ended")
            .unwrap();
        buf.push_str(std::str::from_utf8(&chunk).unwrap());
    }
    buf
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_text_and_json_endpoints() {
    let server = TestServer::start().await;

    let res = server.get("/").await;
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "hi");

    let res = server.get("/json").await;
    assert_eq!(res.headers()["content-type"], "application/json");
    assert_eq!(res.text().await.unwrap(), r#"{"text":"hi","numbers":[1,2,3]}"#);

    let res = server.get("/echo?input=Hello").await;
    assert_eq!(
        res.text().await.unwrap(),
        r#"{"normal":"Hello","shouty":"HELLO","characterCount":5,"backwards":"olleH"}"#
    );

    let res = server.get("/echo").await;
    assert_eq!(res.status(), 400);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_static_files() {
    let server = TestServer::start().await;

    let res = server.get("/index.html").await;
    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["content-type"], "text/html; charset=utf-8");
    assert_eq!(res.text().await.unwrap(), "<h1>chat</h1>");

    let res = server.get("/css/app.css").await;
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "body{}");

    let res = server.get("/my%20file.txt").await;
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "spaced");

    assert_eq!(server.get("/nope.txt").await.status(), 404);

    for target in [
        "/../secret.txt",
        "/css/../../secret.txt",
        "/%2e%2e/secret.txt",
        "/..%2Fsecret.txt",
    ] {
        let response = server.raw_get(target).await;
        assert!(response.starts_with("HTTP/1.1 404"), "{}: {}", target, response);
        assert!(!response.contains("top secret"));
    }

    let res = reqwest::Client::new()
        .post(server.url("/chat?message=hi"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 405);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_chat_without_clients() {
    let server = TestServer::start().await;

    let res = server.get("/chat?message=hello").await;
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "Message sent to chat: hello");

    assert_eq!(server.get("/chat").await.status(), 400);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_each_event_stream_receives_once() {
    let server = TestServer::start().await;

    let mut streams = Vec::new();
    for _ in 0..3 {
        let res = server.get("/sse").await;
        assert_eq!(res.status(), 200);
        assert_eq!(res.headers()["content-type"], "text/event-stream");
        streams.push(res.bytes_stream());
    }
    server.wait_for("event_streams", 3).await;

    server.get("/chat?message=X").await;
    server.get("/chat?message=Y").await;

    for stream in &mut streams {
        let got = read_exactly(stream, "data: X\n\ndata: Y\n\n").await;
        assert_eq!(got, "data: X\n\ndata: Y\n\n");
    }

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_disconnect_does_not_block_others() {
    let server = TestServer::start().await;

    let gone = server.get("/sse").await;
    let mut stays = server.get("/sse").await.bytes_stream();
    server.wait_for("event_streams", 2).await;
    drop(gone);

    let res = server.get("/chat?message=still%20here").await;
    assert_eq!(res.status(), 200);
    assert_eq!(read_exactly(&mut stays, "data: still here\n\n").await, "data: still here\n\n");

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_carriage_return_stays_inside_data() {
    let server = TestServer::start().await;

    let mut sse = server.get("/sse").await.bytes_stream();
    server.wait_for("event_streams", 1).await;

    server.get("/chat?message=hi%0Devent:%20evil").await;

    let expected = "data: hi\ndata: event: evil\n\n";
    assert_eq!(read_exactly(&mut sse, expected).await, expected);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_websocket_and_event_stream_both_receive() {
    let server = TestServer::start().await;

    let (mut ws, response) = tokio_tungstenite::connect_async(format!("ws://{}/ws", server.addr))
        .await
        .unwrap();
    assert_eq!(response.status(), 101);
    let mut sse = server.get("/sse").await.bytes_stream();

    server.wait_for("websockets", 1).await;
    server.wait_for("event_streams", 1).await;

    server.get("/chat?message=hello%20all").await;

    let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(frame, Message::text("hello all"));
    assert_eq!(read_exactly(&mut sse, "data: hello all\n\n").await, "data: hello all\n\n");

    ws.send(Message::Close(None)).await.unwrap();
    server.wait_for("websockets", 0).await;

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_ends_streams() {
    let server = TestServer::start().await;

    let mut sse = server.get("/sse").await.bytes_stream();
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", server.addr))
        .await
        .unwrap();
    server.wait_for("websockets", 1).await;

    server.stop().await;

    let end = tokio::time::timeout(Duration::from_secs(5), sse.next()).await.unwrap();
    assert!(end.is_none() || end.unwrap().is_err());

    let frame = tokio::time::timeout(Duration::from_secs(5), ws.next()).await.unwrap();
    assert!(matches!(frame, None | Some(Ok(Message::Close(_))) | Some(Err(_))));
}
