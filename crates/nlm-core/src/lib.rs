pub mod artifacts;
pub mod auth;
pub mod client;
pub mod config;
pub mod health;
pub mod http;
pub mod methods;
pub mod poll;
pub mod research;
pub mod session;
pub mod sources;
pub mod upload;

mod error;

#[cfg(test)]
mod tests;

pub use client::{CallPhase, RpcClient};
pub use error::{
    Error, Result, STATUS_PERMISSION_DENIED, STATUS_RESOURCE_EXHAUSTED, STATUS_UNAUTHENTICATED,
};
pub use http::{HttpTransport, ReqwestTransport};
pub use methods::RpcMethod;
pub use poll::{PollConfig, PollError, PollState, poll_until};
pub use session::{Credentials, SessionCoordinator};

pub use nlm_rpc::{ResponseSet, RpcRequest, Tree, tree};
