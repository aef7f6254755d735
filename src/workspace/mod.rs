//! Workspace layer: file-change triggers, raw models fed by the bridge, and
//! the manager exposing derived models and toolchain commands.
//!
//! ## Contents
//! - [`Debouncer`] burst collapsing for notifications
//! - [`Triggers`] `leaf_changed` / `packages_changed` event producers
//! - [`Interface`], [`HelperInfo`] raw models and their refresh logic
//! - [`Manager`], [`Tags`], [`EnvScope`] derived models and commands

mod debounce;
mod interface;
mod manager;
mod triggers;

pub use debounce::Debouncer;
pub use interface::{HelperInfo, Interface};
pub use manager::{EnvScope, Manager, Tags};
pub use triggers::Triggers;

#[cfg(test)]
pub(crate) mod testing {
    use serde_json::Value;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, duplex};

    use crate::bridge::Bridge;
    use crate::config::Config;

    /// Bridge backed by an in-memory helper answering with `respond(command)`.
    ///
    /// `respond` returns the response object without its `id`.
    pub(crate) fn scripted_bridge<F>(mut respond: F) -> Bridge
    where
        F: FnMut(&str) -> Value + Send + 'static,
    {
        let (bridge_out, helper_in) = duplex(64 * 1024);
        let (mut helper_out, bridge_in) = duplex(64 * 1024);
        let cfg = Config {
            request_timeout_ms: 0,
            ..Config::default()
        };
        let bridge = Bridge::connect(bridge_in, bridge_out, &cfg, None);

        tokio::spawn(async move {
            let mut lines = BufReader::new(helper_in).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let Ok(request) = serde_json::from_str::<Value>(&line) else {
                    continue;
                };
                let command = request["command"].as_str().unwrap_or_default().to_string();
                let mut reply = respond(&command);
                reply["id"] = request["id"].clone();
                if helper_out
                    .write_all(format!("{reply}\n").as_bytes())
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });
        bridge
    }
}
