//! JSON-RPC 2.0 framing used on the node socket.

use rpc_core::RpcError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize)]
pub struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Vec<Value>,
}

impl<'a> JsonRpcRequest<'a> {
    pub fn new(id: u64, method: &'a str, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub error: Option<JsonRpcErrorObject>,
}

impl JsonRpcResponse {
    pub fn into_result(self) -> Result<Value, RpcError> {
        match self.error {
            Some(error) => Err(RpcError::Rpc {
                code: error.code,
                message: error.message,
            }),
            None => Ok(self.result),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// Server push: `{"method": "subscribe", "params": {"subscription", "result"}}`.
#[derive(Debug, Deserialize)]
pub struct JsonRpcNotification {
    pub method: String,
    pub params: NotificationParams,
}

#[derive(Debug, Deserialize)]
pub struct NotificationParams {
    pub subscription: String,
    #[serde(default)]
    pub result: Value,
}

/// Anything the node may send on the socket.
#[derive(Debug)]
pub enum Incoming {
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
}

impl Incoming {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;
        if value.get("method").is_some() {
            serde_json::from_value(value).map(Incoming::Notification)
        } else {
            serde_json::from_value(value).map(Incoming::Response)
        }
    }
}
