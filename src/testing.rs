//! In-process stub of an Anvil-style JSON-RPC node, shared by tests.
//!
//! Implements just enough of the eth/anvil namespaces for the chain
//! client and deployer tests: deployments get deterministic addresses
//! and receipts, queries answer from recorded state, and every call is
//! logged so tests can assert on what was forwarded.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::post};
use serde_json::{Value, json};
use tokio::sync::Mutex;

pub struct StubNode {
    addr: SocketAddr,
    state: Arc<Mutex<StubState>>,
}

#[derive(Default)]
struct StubState {
    block: u64,
    tx_counter: u64,
    sent_data: Vec<String>,
    code: HashMap<String, String>,
    receipts: HashMap<String, Value>,
    fail_next_send: Option<String>,
    fail_data_marker: Option<String>,
    calls: Vec<(String, Value)>,
}

impl StubNode {
    /// Anvil's first well-known dev account.
    pub const DEV_ACCOUNT: &'static str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

    pub async fn start() -> Self {
        let state = Arc::new(Mutex::new(StubState::default()));
        let app = Router::new()
            .route("/", post(handle_rpc))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, state }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Make the next `eth_sendTransaction` fail with the given message.
    pub async fn fail_next_send(&self, message: &str) {
        self.state.lock().await.fail_next_send = Some(message.to_string());
    }

    /// Reject any `eth_sendTransaction` whose data contains `marker`.
    pub async fn fail_bytecode_containing(&self, marker: &str) {
        self.state.lock().await.fail_data_marker = Some(marker.to_string());
    }

    /// Every `data` field passed to `eth_sendTransaction`, in order.
    pub async fn sent_data(&self) -> Vec<String> {
        self.state.lock().await.sent_data.clone()
    }

    /// All RPC calls received, in order.
    pub async fn calls(&self) -> Vec<(String, Value)> {
        self.state.lock().await.calls.clone()
    }
}

async fn handle_rpc(
    State(state): State<Arc<Mutex<StubState>>>,
    Json(req): Json<Value>,
) -> Json<Value> {
    let id = req.get("id").cloned().unwrap_or(json!(0));
    let method = req
        .get("method")
        .and_then(|m| m.as_str())
        .unwrap_or("")
        .to_string();
    let params = req.get("params").cloned().unwrap_or(json!([]));

    let mut s = state.lock().await;
    s.calls.push((method.clone(), params.clone()));

    let result: Result<Value, String> = match method.as_str() {
        "eth_chainId" => Ok(json!("0x7a69")), // 31337
        "eth_blockNumber" => Ok(json!(format!("0x{:x}", s.block))),
        "eth_accounts" => Ok(json!([StubNode::DEV_ACCOUNT])),
        "eth_sendTransaction" => send_transaction(&mut s, &params),
        "eth_getTransactionReceipt" => {
            let hash = params[0].as_str().unwrap_or("");
            Ok(s.receipts.get(hash).cloned().unwrap_or(Value::Null))
        }
        "eth_getCode" => {
            let address = params[0].as_str().unwrap_or("").to_lowercase();
            Ok(json!(s.code.get(&address).cloned().unwrap_or_else(|| "0x".to_string())))
        }
        "eth_getBalance" => Ok(json!("0x0")),
        "eth_getTransactionCount" => Ok(json!("0x0")),
        "eth_getLogs" => Ok(json!([])),
        m if m.starts_with("anvil_") => Ok(json!(true)),
        other => Err(format!("Method not found: {}", other)),
    };

    let reply = match result {
        Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
        Err(message) => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": -32000, "message": message }
        }),
    };
    Json(reply)
}

fn send_transaction(s: &mut StubState, params: &Value) -> Result<Value, String> {
    if let Some(message) = s.fail_next_send.take() {
        return Err(message);
    }
    let data = params[0]
        .get("data")
        .and_then(|d| d.as_str())
        .unwrap_or("")
        .to_string();
    if let Some(marker) = &s.fail_data_marker {
        if data.contains(marker.as_str()) {
            return Err(format!("rejected bytecode containing {}", marker));
        }
    }

    s.sent_data.push(data);
    s.block += 1;
    s.tx_counter += 1;
    let tx_hash = format!("0x{:064x}", s.tx_counter);
    let address = format!("0x{:040x}", 0xc0ffee_u64 + s.tx_counter);
    s.code.insert(address.clone(), "0x6001600101".to_string());
    s.receipts.insert(
        tx_hash.clone(),
        json!({
            "transactionHash": tx_hash,
            "contractAddress": address,
            "blockNumber": format!("0x{:x}", s.block),
            "status": "0x1",
        }),
    );
    Ok(json!(tx_hash))
}
