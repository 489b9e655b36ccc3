pub mod jsonrpc;
pub mod rpc_methods;
