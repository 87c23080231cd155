//! Transaction-simulation wallet proxy.
//!
//! Sits where a dApp expects an injected wallet. Reads for the
//! impersonated account are answered from the state a simulation backend
//! produced by replaying the pending transaction bundle; everything else
//! goes to the real chain endpoint.

pub mod bridge;
pub mod config;
pub mod error;
pub mod intercept;
pub mod obfuscator;
pub mod provider;
pub mod rpc;
pub mod server;
pub mod settings;
pub mod state;
pub mod store;
pub mod types;
pub mod upstream;
