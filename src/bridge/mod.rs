//! Bridge IPC: one long-lived helper process, line-delimited JSON, requests
//! correlated by numeric id.
//!
//! ## Contents
//! - [`BridgeCommand`] command enum, [`Request`]/[`Response`] wire types
//! - [`Bridge`] the multiplexer (spawn or connect, send, dispose)
//!
//! The helper receives the inherited environment plus `LEAF_NON_INTERACTIVE=1`
//! and `LEAF_DEBUG=1`; the bridge never interprets those values.

mod multiplexer;
mod protocol;

pub use multiplexer::{Bridge, BridgeResult};
pub use protocol::{BridgeCommand, PROFILE_OUT_OF_SYNC, Request, Response, ResponseError};
