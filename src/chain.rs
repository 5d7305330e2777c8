//! JSON-RPC client for the development chain node.
//!
//! The node is treated as an opaque remote service: raw calls go
//! through [`ChainClient::request`], and the handful of typed helpers
//! here cover what the deployment pipeline and the contract-details
//! view need. Deployment signs nothing locally; transactions are sent
//! from the node's first unlocked account (Anvil's funded dev signer).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde_json::{Value, json};
use tracing::{debug, warn};

/// Base delay between connect probes; doubles per attempt, capped.
const CONNECT_BACKOFF_BASE: Duration = Duration::from_millis(500);
const CONNECT_BACKOFF_CAP: Duration = Duration::from_secs(10);

/// Receipt polling: Anvil automines, so confirmation is near-immediate;
/// the bound guards against a node switched to interval mining.
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(250);
const RECEIPT_POLL_ATTEMPTS: u32 = 120;

/// Chain-side result of one contract deployment.
#[derive(Debug, Clone)]
pub struct Deployment {
    pub address: String,
    pub deployer: String,
    pub tx_hash: String,
    pub block_number: u64,
}

#[derive(Debug)]
pub struct ChainClient {
    http: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl ChainClient {
    pub fn new(url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.to_string(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Probe the node with `eth_chainId` until it answers, retrying
    /// `max_attempts` times with exponential backoff. Exhausting the
    /// budget is a terminal failure, not a silent infinite loop.
    pub async fn connect(url: &str, max_attempts: u32) -> Result<Self> {
        anyhow::ensure!(max_attempts > 0, "connect requires at least one attempt");
        let client = Self::new(url);
        let mut delay = CONNECT_BACKOFF_BASE;
        for attempt in 1..=max_attempts {
            match client.request("eth_chainId", json!([])).await {
                Ok(chain_id) => {
                    debug!(%url, ?chain_id, "connected to chain node");
                    return Ok(client);
                }
                Err(e) if attempt < max_attempts => {
                    warn!(%url, attempt, max_attempts, error = %e, "chain node not ready, retrying");
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(CONNECT_BACKOFF_CAP);
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("Chain node at {} unreachable after {} attempts", url, max_attempts)
                    });
                }
            }
        }
        unreachable!("connect loop covers all attempts");
    }

    /// Send one raw JSON-RPC call and return its `result` field.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let resp = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("RPC transport failure for {}", method))?;
        let reply: Value = resp
            .json()
            .await
            .with_context(|| format!("Invalid RPC response for {}", method))?;

        if let Some(err) = reply.get("error").filter(|e| !e.is_null()) {
            bail!("RPC {} failed: {}", method, err);
        }
        Ok(reply.get("result").cloned().unwrap_or(Value::Null))
    }

    pub async fn chain_id(&self) -> Result<String> {
        let result = self.request("eth_chainId", json!([])).await?;
        Ok(parse_hex_u64(&result)?.to_string())
    }

    pub async fn block_number(&self) -> Result<u64> {
        let result = self.request("eth_blockNumber", json!([])).await?;
        parse_hex_u64(&result)
    }

    /// The funded signer paying for deployments: the node's first
    /// unlocked account.
    pub async fn deployer_account(&self) -> Result<String> {
        let accounts = self.request("eth_accounts", json!([])).await?;
        accounts
            .as_array()
            .and_then(|a| a.first())
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .context("Node reported no unlocked accounts")
    }

    /// Submit creation bytecode from the node's dev signer and wait for
    /// the confirming receipt.
    pub async fn deploy(&self, bytecode: &str) -> Result<Deployment> {
        let deployer = self.deployer_account().await?;
        let data = if bytecode.starts_with("0x") {
            bytecode.to_string()
        } else {
            format!("0x{}", bytecode)
        };

        let tx_hash = self
            .request(
                "eth_sendTransaction",
                json!([{ "from": deployer, "data": data }]),
            )
            .await?
            .as_str()
            .context("eth_sendTransaction returned a non-string hash")?
            .to_string();

        let receipt = self.wait_for_receipt(&tx_hash).await?;
        let address = receipt
            .get("contractAddress")
            .and_then(|v| v.as_str())
            .context("Receipt missing contractAddress")?
            .to_string();
        let block_number = parse_hex_u64(
            receipt
                .get("blockNumber")
                .unwrap_or(&Value::Null),
        )?;

        Ok(Deployment {
            address,
            deployer,
            tx_hash,
            block_number,
        })
    }

    async fn wait_for_receipt(&self, tx_hash: &str) -> Result<Value> {
        for _ in 0..RECEIPT_POLL_ATTEMPTS {
            let receipt = self
                .request("eth_getTransactionReceipt", json!([tx_hash]))
                .await?;
            if !receipt.is_null() {
                return Ok(receipt);
            }
            tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
        }
        bail!("Transaction {} not confirmed in time", tx_hash);
    }

    /// Runtime code at `address`; `"0x"` means no contract lives there.
    pub async fn get_code(&self, address: &str) -> Result<String> {
        let result = self
            .request("eth_getCode", json!([address, "latest"]))
            .await?;
        Ok(result.as_str().unwrap_or("0x").to_string())
    }

    /// Balance at `address`, formatted in ether.
    pub async fn get_balance(&self, address: &str) -> Result<String> {
        let result = self
            .request("eth_getBalance", json!([address, "latest"]))
            .await?;
        let wei = parse_hex_u128(&result)?;
        Ok(format_ether(wei))
    }

    pub async fn get_transaction_count(&self, address: &str) -> Result<u64> {
        let result = self
            .request("eth_getTransactionCount", json!([address, "latest"]))
            .await?;
        parse_hex_u64(&result)
    }

    /// First log emitted by `address` over the whole chain, if any.
    /// Used for best-effort deployment-transaction discovery.
    pub async fn first_log_tx(&self, address: &str) -> Result<Option<String>> {
        let logs = self
            .request(
                "eth_getLogs",
                json!([{ "fromBlock": "0x0", "toBlock": "latest", "address": address }]),
            )
            .await?;
        Ok(logs
            .as_array()
            .and_then(|a| a.first())
            .and_then(|log| log.get("transactionHash"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()))
    }
}

fn parse_hex_u64(value: &Value) -> Result<u64> {
    let s = value
        .as_str()
        .with_context(|| format!("Expected hex quantity, got {}", value))?;
    u64::from_str_radix(s.trim_start_matches("0x"), 16)
        .with_context(|| format!("Invalid hex quantity: {}", s))
}

fn parse_hex_u128(value: &Value) -> Result<u128> {
    let s = value
        .as_str()
        .with_context(|| format!("Expected hex quantity, got {}", value))?;
    u128::from_str_radix(s.trim_start_matches("0x"), 16)
        .with_context(|| format!("Invalid hex quantity: {}", s))
}

/// Format a wei amount as a decimal ether string, trailing zeros
/// trimmed but always keeping one fractional digit ("0.0", "1.5").
pub fn format_ether(wei: u128) -> String {
    const WEI_PER_ETHER: u128 = 1_000_000_000_000_000_000;
    let whole = wei / WEI_PER_ETHER;
    let frac = wei % WEI_PER_ETHER;
    let frac_str = format!("{:018}", frac);
    let trimmed = frac_str.trim_end_matches('0');
    if trimmed.is_empty() {
        format!("{}.0", whole)
    } else {
        format!("{}.{}", whole, trimmed)
    }
}
