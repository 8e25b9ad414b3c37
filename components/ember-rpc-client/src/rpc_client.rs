use reqwest::blocking::Client;
use serde::de::DeserializeOwned;

#[derive(Debug)]
pub enum RpcError {
    Generic,
    Message(String),
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            RpcError::Generic => write!(f, "rpc error"),
            RpcError::Message(message) => write!(f, "{}", message),
        }
    }
}

pub struct EthRpc {
    pub url: String,
    pub client: Client,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: String,
    pub block_number: String,
    pub contract_address: Option<String>,
    pub status: String,
}

#[derive(Deserialize, Debug)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize, Debug)]
struct RpcErrorObject {
    message: String,
}

/// Parses a JSON-RPC hex quantity ("0x10") into a u64.
pub fn parse_quantity(quantity: &str) -> Result<u64, RpcError> {
    let raw_value = quantity.strip_prefix("0x").unwrap_or(quantity);
    u64::from_str_radix(raw_value, 16)
        .map_err(|_| RpcError::Message(format!("unable to parse quantity '{}'", quantity)))
}

pub fn to_quantity(value: u64) -> String {
    format!("0x{:x}", value)
}

impl EthRpc {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.into(),
            client: Client::builder().build().unwrap(),
        }
    }

    fn rpc_call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, RpcError> {
        let res = self
            .client
            .post(&self.url)
            .json(&json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": method,
                "params": params,
            }))
            .send()
            .map_err(|e| RpcError::Message(format!("unable to reach rpc endpoint\n{}", e)))?;

        if !res.status().is_success() {
            return Err(RpcError::Message(format!(
                "rpc endpoint returned {}",
                res.status()
            )));
        }

        let response: RpcResponse<T> = res
            .json()
            .map_err(|e| RpcError::Message(format!("unable to parse rpc response\n{}", e)))?;

        match (response.result, response.error) {
            (_, Some(error)) => Err(RpcError::Message(error.message)),
            (Some(result), None) => Ok(result),
            // A null result is a valid response for nullable queries
            // (receipt of a pending transaction).
            (None, None) => serde_json::from_value(serde_json::Value::Null)
                .map_err(|_| RpcError::Generic),
        }
    }

    pub fn send_transaction(&self, transaction: &TransactionRequest) -> Result<String, RpcError> {
        self.rpc_call("eth_sendTransaction", json!([transaction]))
    }

    pub fn get_transaction_receipt(
        &self,
        tx_hash: &str,
    ) -> Result<Option<TransactionReceipt>, RpcError> {
        self.rpc_call("eth_getTransactionReceipt", json!([tx_hash]))
    }

    pub fn block_number(&self) -> Result<u64, RpcError> {
        let quantity: String = self.rpc_call("eth_blockNumber", json!([]))?;
        parse_quantity(&quantity)
    }

    pub fn call(&self, transaction: &TransactionRequest) -> Result<String, RpcError> {
        self.rpc_call("eth_call", json!([transaction, "latest"]))
    }

    pub fn get_transaction_count(&self, address: &str) -> Result<u64, RpcError> {
        let quantity: String =
            self.rpc_call("eth_getTransactionCount", json!([address, "latest"]))?;
        parse_quantity(&quantity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_quantities() {
        assert_eq!(parse_quantity("0x10").unwrap(), 16);
        assert_eq!(parse_quantity("ff").unwrap(), 255);
        assert_eq!(to_quantity(16), "0x10");
        assert!(parse_quantity("0xzz").is_err());
    }

    #[test]
    fn serializes_transaction_requests_in_wire_form() {
        let tx = TransactionRequest {
            from: Some("0xC549EcF0d9D72eAc5d806Ca25545A82A6BBe8BD1".to_string()),
            to: None,
            data: Some("0x6080".to_string()),
            value: None,
            nonce: Some("0x0".to_string()),
            gas: None,
        };
        let encoded = serde_json::to_value(&tx).unwrap();
        assert_eq!(
            encoded,
            json!({
                "from": "0xC549EcF0d9D72eAc5d806Ca25545A82A6BBe8BD1",
                "data": "0x6080",
                "nonce": "0x0",
            })
        );
    }
}
