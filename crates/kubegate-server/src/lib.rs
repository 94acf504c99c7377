//! HTTP surface of kubegate
//!
//! This crate resolves caller identities, dispatches queries to the cluster
//! layers, serves the JSON API and runs the standalone impersonating proxy.

mod error;
mod gateway;
mod identity;
mod proxy;
mod routes;
mod server;

pub use error::ServerError;
pub use gateway::Gateway;
pub use identity::{HeaderIdentityResolver, IdentityConfig, IdentityError, IdentityResolver};
pub use proxy::{ImpersonatingProxy, PROXY_FAILURE};
pub use routes::{PROXY_PREFIX, STREAM_BUFFER, router};
pub use server::{GatewayServer, SHUTDOWN_TIMEOUT, ServerState};
