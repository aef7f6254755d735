use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, duplex};

use leafvisor::{
    Bridge, BridgeCommand, Config, EnvVars, Error, Immediate, Interface, Manager, ModelElement, ProcessLauncher, Scope,
    Triggers,
};

/// Bridge talking to an in-memory helper; `respond` gets the command name and
/// returns the response body without its id.
fn fake_helper<F>(mut respond: F) -> Bridge
where
    F: FnMut(&str) -> Value + Send + 'static,
{
    let (bridge_out, helper_in) = duplex(64 * 1024);
    let (mut helper_out, bridge_in) = duplex(64 * 1024);
    let bridge = Bridge::connect(bridge_in, bridge_out, &Config::default(), None);

    tokio::spawn(async move {
        let mut lines = BufReader::new(helper_in).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let request: Value = serde_json::from_str(&line).unwrap();
            let mut reply = respond(request["command"].as_str().unwrap());
            reply["id"] = request["id"].clone();
            helper_out
                .write_all(format!("{reply}\n").as_bytes())
                .await
                .unwrap();
        }
    });
    bridge
}

fn vars(pairs: &[(&str, &str)]) -> EnvVars {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[tokio::test]
async fn test_identical_bridge_payloads_notify_once() {
    let mut replies = vec![
        json!({"FOO": "2"}),
        json!({"FOO": "1"}),
        json!({"FOO": "1"}),
    ];
    let bridge = fake_helper(move |command| {
        assert_eq!(command, "resolveVariables");
        json!({"result": replies.pop()})
    });

    let scope = Scope::new();
    let model: ModelElement<EnvVars> = ModelElement::new("env_vars", &scope);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    model.add_listener(&scope, move |new, old| log.lock().push((new.clone(), old.clone())));

    let mut changed = Vec::new();
    for _ in 0..3 {
        let request = bridge.send(BridgeCommand::ResolveVariables);
        let outcome = model.set_future(async move {
            let value = request.await?.ok_or_else(|| Error::failed("no variables"))?;
            serde_json::from_value::<EnvVars>(value).map_err(|e| Error::failed(e.to_string()))
        });
        changed.push(outcome.await.unwrap());
    }

    assert_eq!(changed, vec![false, false, true]);
    let seen = seen.lock();
    // Subscription call with the first value, then the single real change.
    assert_eq!(
        *seen,
        vec![
            (vars(&[("FOO", "1")]), vars(&[("FOO", "1")])),
            (vars(&[("FOO", "2")]), vars(&[("FOO", "1")])),
        ]
    );
    assert_eq!(model.value(), Some(vars(&[("FOO", "2")])));
}

#[tokio::test]
async fn test_file_change_refreshes_derived_models() {
    let current = Arc::new(Mutex::new("dev"));
    let profile = Arc::clone(&current);
    let bridge = fake_helper(move |command| match command {
        "workspaceInfo" => {
            let name = *profile.lock();
            json!({"result": {"initialized": true, "profiles": {name: {"current": true}}}})
        }
        "resolveVariables" => json!({"error": {"type": "ProfileOutOfSyncException", "message": "sync"}}),
        _ => json!({"result": null}),
    });

    let scope = Scope::new();
    let interface = Interface::new(bridge, &scope);
    let triggers = Triggers::new(Duration::from_millis(10), &scope);
    let launcher = ProcessLauncher::new("Leaf", Arc::new(Some(EnvVars::new()))).with_scheduler(Arc::new(Immediate::new()));
    let manager = Manager::new(interface, launcher, triggers, &scope);

    let wait = Duration::from_secs(5);
    let name = tokio::time::timeout(wait, manager.profile_name().get()).await.unwrap();
    assert_eq!(name, Ok(Some("dev".to_string())));
    assert_eq!(tokio::time::timeout(wait, manager.out_of_sync().get()).await.unwrap(), Ok(true));
    assert_eq!(manager.env_vars().get().await, Ok(EnvVars::new()));

    let (tx, rx) = tokio::sync::oneshot::channel();
    let tx = Mutex::new(Some(tx));
    manager.profile_name().add_listener(&scope, move |new, old| {
        if new != old {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(new.clone());
            }
        }
    });

    *current.lock() = "prod";
    manager.triggers().notify_files_changed();
    let switched = tokio::time::timeout(wait, rx).await.unwrap().unwrap();
    assert_eq!(switched, Some("prod".to_string()));
    assert_eq!(manager.workspace_ready().value(), Some(true));
}

#[tokio::test]
async fn test_commands_without_workspace_are_refused() {
    let bridge = fake_helper(|_| json!({"result": null}));
    let scope = Scope::new();
    let launcher = ProcessLauncher::new("Leaf", Arc::new(Some(EnvVars::new())));
    let manager = Manager::new(
        Interface::new(bridge, &scope),
        launcher,
        Triggers::new(Duration::from_millis(10), &scope),
        &scope,
    );
    assert_eq!(manager.sync_current_profile().await, Err(Error::MissingCwd));
}
