//! In-process fake server for session tests.
//!
//! [`DuplexLauncher`] hands the session one end of two in-memory pipes and
//! passes the other ends to the test as a [`ServerSide`], which either drives
//! the conversation by hand or runs [`serve`], a small clangd stand-in.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use relay_lsp::{FrameReader, Launcher, RpcError, RpcResult, ServerIo, Session, SessionOptions, encode};
use serde_json::{Value, json};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;

/// Labels the fake server offers for every completion request.
pub const COMPLETION_LABELS: [&str; 5] = ["x", "yy", "~S", "operator=", "S"];

pub const TEST_CPP: &str = "struct S {\n  int x;\n  int yy;\n};\n\nint main() {\n  S s;\n  s.\n}\n";

/// The server's end of one launch.
pub struct ServerSide {
    reader: FrameReader<DuplexStream>,
    writer: DuplexStream,
}

impl ServerSide {
    /// Next frame from the client, or `None` once the client hangs up.
    pub async fn next(&mut self) -> Option<Value> {
        self.reader.read_frame().await.ok().flatten()
    }

    /// Next frame, failing the test if none arrives in time.
    pub async fn recv(&mut self) -> Value {
        tokio::time::timeout(Duration::from_secs(5), self.next())
            .await
            .expect("client frame within 5s")
            .expect("client stream open")
    }

    /// Receive a frame and check its method.
    pub async fn expect(&mut self, method: &str) -> Value {
        let frame = self.recv().await;
        assert_eq!(frame["method"], method, "unexpected frame: {frame}");
        frame
    }

    pub async fn send(&mut self, frame: &Value) {
        let bytes = encode(frame).unwrap();
        self.write_raw(&bytes).await;
    }

    pub async fn write_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    pub async fn reply(&mut self, id: &Value, result: Value) {
        self.send(&json!({"jsonrpc": "2.0", "id": id, "result": result}))
            .await;
    }

    pub async fn publish_diagnostics(&mut self, uri: &str, message: &str) {
        self.send(&json!({
            "jsonrpc": "2.0",
            "method": "textDocument/publishDiagnostics",
            "params": {
                "uri": uri,
                "diagnostics": [{
                    "range": {
                        "start": { "line": 7, "character": 2 },
                        "end": { "line": 7, "character": 4 }
                    },
                    "severity": 1,
                    "message": message
                }]
            }
        }))
        .await;
    }

    /// Answer the `initialize` request and swallow `initialized`.
    pub async fn handshake(&mut self) {
        let init = self.expect("initialize").await;
        self.reply(&init["id"], initialize_result()).await;
        self.expect("initialized").await;
    }
}

pub fn initialize_result() -> Value {
    json!({
        "capabilities": { "completionProvider": { "triggerCharacters": [".", "->", "::"] } },
        "serverInfo": { "name": "fake-clangd", "version": "0.1" }
    })
}

/// Answer like a cooperative server until `exit` or hang-up.
pub async fn serve(mut side: ServerSide) {
    while let Some(frame) = side.next().await {
        let method = frame["method"].as_str().unwrap_or_default().to_string();
        let id = frame.get("id").cloned();
        match (method.as_str(), id) {
            ("initialize", Some(id)) => side.reply(&id, initialize_result()).await,
            ("textDocument/completion", Some(id)) => {
                let items: Vec<Value> = COMPLETION_LABELS
                    .iter()
                    .map(|label| json!({ "label": label, "kind": 5 }))
                    .collect();
                side.reply(&id, json!({ "isIncomplete": false, "items": items }))
                    .await;
            }
            ("shutdown", Some(id)) => side.reply(&id, Value::Null).await,
            ("exit", None) => break,
            ("textDocument/didOpen" | "textDocument/didChange", None) => {
                let uri = frame["params"]["textDocument"]["uri"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                side.publish_diagnostics(&uri, "expected unqualified-id").await;
            }
            (_, Some(id)) => {
                side.send(&json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": { "code": -32601, "message": format!("unknown method {method}") }
                }))
                .await;
            }
            (_, None) => {}
        }
    }
}

/// Launches in-memory servers and hands their far ends to the test.
pub struct DuplexLauncher {
    sides: mpsc::UnboundedSender<ServerSide>,
    launches: Arc<AtomicUsize>,
}

impl Launcher for DuplexLauncher {
    fn launch(&self) -> RpcResult<ServerIo> {
        let (client_read, server_write) = tokio::io::duplex(1 << 20);
        let (server_read, client_write) = tokio::io::duplex(1 << 20);
        self.sides
            .send(ServerSide {
                reader: FrameReader::new(server_read),
                writer: server_write,
            })
            .map_err(|_| RpcError::ProcessExited("test harness dropped".to_string()))?;
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(ServerIo::new(Box::new(client_read), Box::new(client_write)))
    }

    fn describe(&self) -> String {
        String::from("fake-clangd")
    }
}

/// Receives the server end of each launch.
pub struct Harness {
    sides: mpsc::UnboundedReceiver<ServerSide>,
    launches: Arc<AtomicUsize>,
}

impl Harness {
    pub async fn next_server(&mut self) -> ServerSide {
        tokio::time::timeout(Duration::from_secs(5), self.sides.recv())
            .await
            .expect("launch within 5s")
            .expect("launcher alive")
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

pub fn launcher() -> (DuplexLauncher, Harness) {
    let (tx, rx) = mpsc::unbounded_channel();
    let launches = Arc::new(AtomicUsize::new(0));
    (
        DuplexLauncher {
            sides: tx,
            launches: Arc::clone(&launches),
        },
        Harness {
            sides: rx,
            launches,
        },
    )
}

pub fn options(request_timeout: Duration) -> SessionOptions {
    SessionOptions {
        request_timeout,
        diagnostics_timeout: Duration::from_secs(2),
        shutdown_timeout: Duration::from_millis(200),
    }
}

/// A started session whose server runs [`serve`] in the background.
pub async fn started_session() -> (Arc<Session>, Harness) {
    let (launcher, mut harness) = launcher();
    let session = Arc::new(Session::new(launcher, options(Duration::from_secs(5))));
    let start = tokio::spawn({
        let session = Arc::clone(&session);
        async move { session.start(json!({})).await }
    });
    let side = harness.next_server().await;
    tokio::spawn(serve(side));
    start.await.unwrap().unwrap();
    (session, harness)
}
