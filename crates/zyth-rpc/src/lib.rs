pub mod rpc;

pub use rpc::{routes, serve, RpcContext, RpcRequest};
