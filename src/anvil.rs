//! Pass-through surface for Anvil's node-control RPC methods.
//!
//! Callers address methods by their API name (`mine`, `setBalance`);
//! the catalog maps each to its `anvil_*` RPC name. Anything outside
//! the catalog is rejected before it reaches the node, so arbitrary
//! RPC methods cannot be smuggled through this endpoint.

use serde_json::Value;

use crate::chain::ChainClient;
use crate::errors::DeployError;

/// API-name → RPC-name catalog. `setAutoImpersonateAccount` maps onto
/// `anvil_autoImpersonateAccount` (the RPC name has no `set` prefix).
const METHODS: &[(&str, &str)] = &[
    ("impersonateAccount", "anvil_impersonateAccount"),
    ("stopImpersonatingAccount", "anvil_stopImpersonatingAccount"),
    ("setAutoImpersonateAccount", "anvil_autoImpersonateAccount"),
    ("getAutomine", "anvil_getAutomine"),
    ("mine", "anvil_mine"),
    ("dropTransaction", "anvil_dropTransaction"),
    ("reset", "anvil_reset"),
    ("setRpcUrl", "anvil_setRpcUrl"),
    ("setBalance", "anvil_setBalance"),
    ("setCode", "anvil_setCode"),
    ("setNonce", "anvil_setNonce"),
    ("setStorageAt", "anvil_setStorageAt"),
    ("setCoinbase", "anvil_setCoinbase"),
    ("setLoggingEnabled", "anvil_setLoggingEnabled"),
    ("setMinGasPrice", "anvil_setMinGasPrice"),
    ("setNextBlockBaseFeePerGas", "anvil_setNextBlockBaseFeePerGas"),
    ("setChainId", "anvil_setChainId"),
    ("dumpState", "anvil_dumpState"),
    ("loadState", "anvil_loadState"),
    ("getNodeInfo", "anvil_nodeInfo"),
];

pub fn rpc_method(api_name: &str) -> Option<&'static str> {
    METHODS
        .iter()
        .find(|(api, _)| *api == api_name)
        .map(|(_, rpc)| *rpc)
}

/// Forward `params` verbatim to the mapped RPC method. Unknown method
/// names fail with `Validation` before anything is sent to the node.
pub async fn forward(
    chain: &ChainClient,
    api_name: &str,
    params: Value,
) -> Result<Value, DeployError> {
    let method = rpc_method(api_name)
        .ok_or_else(|| DeployError::Validation(format!("Unknown anvil method: {}", api_name)))?;
    chain
        .request(method, params)
        .await
        .map_err(DeployError::Other)
}
