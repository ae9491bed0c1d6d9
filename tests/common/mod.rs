//! Common test utilities
//!
//! A mock Chrome DevTools Protocol endpoint speaking just enough of the
//! protocol to drive `CdpEngine` end to end, plus a one-shot HTTP server
//! for the fetcher.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// Canned `Runtime.evaluate` answer
#[derive(Debug, Clone)]
pub enum Evaluation {
    /// `returnByValue` result
    Value(Value),
    /// Script threw
    Throw(String),
}

#[derive(Debug, Default)]
struct ServerState {
    commands: Vec<(String, Value)>,
    evaluations: Vec<(String, Evaluation)>,
    bindings: Vec<String>,
    fetch_enabled: bool,
}

/// Mock Chrome server
pub struct MockChromeServer {
    addr: String,
    state: Arc<Mutex<ServerState>>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl MockChromeServer {
    /// Start a new mock Chrome server
    pub async fn start() -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(Mutex::new(ServerState::default()));

        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let server_state = Arc::clone(&state);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, _)) => {
                                tokio::spawn(Self::handle_connection(stream, Arc::clone(&server_state)));
                            }
                            Err(_) => break,
                        }
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
        });

        Ok(Self {
            addr: format!("ws://{}", addr),
            state,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    /// WebSocket URL of the page target
    pub fn page_url(&self) -> String {
        format!("{}/devtools/page/MOCK", self.addr)
    }

    /// Answer evaluations whose expression contains `pattern`
    pub async fn on_evaluate(&self, pattern: &str, evaluation: Evaluation) {
        self.state
            .lock()
            .await
            .evaluations
            .push((pattern.to_string(), evaluation));
    }

    /// Every command received, with its parameters
    pub async fn commands(&self) -> Vec<(String, Value)> {
        self.state.lock().await.commands.clone()
    }

    /// Parameters of the first command named `method`
    pub async fn params_of(&self, method: &str) -> Option<Value> {
        self.state
            .lock()
            .await
            .commands
            .iter()
            .find(|(m, _)| m == method)
            .map(|(_, params)| params.clone())
    }

    pub async fn received(&self, method: &str) -> bool {
        self.params_of(method).await.is_some()
    }

    async fn handle_connection(stream: TcpStream, state: Arc<Mutex<ServerState>>) {
        let Ok(ws_stream) = accept_async(stream).await else {
            return;
        };
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Value>();

        tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                if ws_sender.send(Message::Text(message.to_string())).await.is_err() {
                    break;
                }
            }
        });

        while let Some(Ok(message)) = ws_receiver.next().await {
            let text = match message {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };
            let Ok(request) = serde_json::from_str::<Value>(&text) else {
                continue;
            };
            Self::handle_request(&request, &state, &out_tx).await;
        }
    }

    async fn handle_request(request: &Value, state: &Arc<Mutex<ServerState>>, out: &mpsc::UnboundedSender<Value>) {
        let id = request["id"].as_u64().unwrap_or(0);
        let method = request["method"].as_str().unwrap_or_default().to_string();
        let params = request.get("params").cloned().unwrap_or(Value::Null);

        state.lock().await.commands.push((method.clone(), params.clone()));

        let result = match method.as_str() {
            "Page.addScriptToEvaluateOnNewDocument" => json!({ "identifier": "script-1" }),
            "Runtime.addBinding" => {
                let name = params["name"].as_str().unwrap_or_default().to_string();
                state.lock().await.bindings.push(name);
                json!({})
            }
            "Fetch.enable" => {
                state.lock().await.fetch_enabled = true;
                json!({})
            }
            "Page.navigate" => {
                let url = params["url"].as_str().unwrap_or_default().to_string();
                if url.contains("unreachable") {
                    json!({ "frameId": "main", "errorText": "net::ERR_NAME_NOT_RESOLVED" })
                } else {
                    Self::emit_navigation(url, state, out).await;
                    json!({ "frameId": "main", "loaderId": "loader-1" })
                }
            }
            "Runtime.evaluate" => Self::evaluate(&params, state).await,
            _ => json!({}),
        };

        let _ = out.send(json!({ "id": id, "result": result }));
    }

    async fn evaluate(params: &Value, state: &Arc<Mutex<ServerState>>) -> Value {
        let expression = params["expression"].as_str().unwrap_or_default();
        let evaluation = state
            .lock()
            .await
            .evaluations
            .iter()
            .find(|(pattern, _)| expression.contains(pattern.as_str()))
            .map(|(_, evaluation)| evaluation.clone());

        match evaluation {
            Some(Evaluation::Value(value)) => {
                let kind = match &value {
                    Value::Null => "object",
                    Value::Bool(_) => "boolean",
                    Value::Number(_) => "number",
                    Value::String(_) => "string",
                    _ => "object",
                };
                json!({ "result": { "type": kind, "value": value } })
            }
            Some(Evaluation::Throw(message)) => json!({
                "result": { "type": "object", "subtype": "error" },
                "exceptionDetails": {
                    "exceptionId": 1,
                    "text": "Uncaught",
                    "lineNumber": 0,
                    "columnNumber": 0,
                    "exception": { "type": "object", "subtype": "error", "description": message }
                }
            }),
            None => json!({ "result": { "type": "undefined" } }),
        }
    }

    /// Emit the events Chrome sends for a successful main-frame navigation
    async fn emit_navigation(url: String, state: &Arc<Mutex<ServerState>>, out: &mpsc::UnboundedSender<Value>) {
        let (bindings, fetch_enabled) = {
            let state = state.lock().await;
            (state.bindings.clone(), state.fetch_enabled)
        };
        let out = out.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = out.send(json!({
                "method": "Page.frameNavigated",
                "params": { "frame": { "id": "main", "url": url } }
            }));
            let _ = out.send(json!({
                "method": "Page.frameNavigated",
                "params": { "frame": { "id": "child", "parentId": "main", "url": "https://ads.example/" } }
            }));
            if fetch_enabled {
                let _ = out.send(json!({
                    "method": "Fetch.requestPaused",
                    "params": {
                        "requestId": "request-1",
                        "request": { "url": "https://example.com/logo.png" },
                        "resourceType": "Image"
                    }
                }));
            }
            let _ = out.send(json!({ "method": "Page.loadEventFired", "params": { "timestamp": 1.0 } }));

            tokio::time::sleep(Duration::from_millis(20)).await;
            for name in bindings {
                let _ = out.send(json!({
                    "method": "Runtime.bindingCalled",
                    "params": { "name": name, "payload": "ready", "executionContextId": 1 }
                }));
            }
        });
    }
}

impl Drop for MockChromeServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Serve one canned HTTP response per connection, forever
pub async fn serve_http(response: Vec<u8>) -> Result<String, Box<dyn std::error::Error>> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let response = response.clone();
            tokio::spawn(async move {
                let mut buffer = [0u8; 4096];
                let _ = stream.read(&mut buffer).await;
                let _ = stream.write_all(&response).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    Ok(format!("http://{}/", addr))
}

/// Raw HTTP/1.1 response with the given status, content type and body
pub fn http_response(status: &str, content_type: &str, body: &[u8]) -> Vec<u8> {
    let mut response = format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        content_type,
        body.len()
    )
    .into_bytes();
    response.extend_from_slice(body);
    response
}
