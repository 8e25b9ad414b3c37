#[macro_use]
extern crate serde_derive;

#[macro_use]
extern crate serde_json;

mod rpc_client;

pub use rpc_client::{
    EthRpc, RpcError, TransactionReceipt, TransactionRequest, parse_quantity, to_quantity,
};
