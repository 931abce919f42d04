use serde_json::{json, Value};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;
use gclid_export::config::Config;

/// Watermark every integration test starts from.
#[allow(dead_code)]
pub const START: &str = "2021-11-01T00:00:00.000Z";

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}

/// Valid config pointed at a mock PostHog host and webhook, tracking
/// action 12 as "Signup" with definitions read from a local file.
#[allow(dead_code)]
pub fn export_config(posthog_uri: &str, dir: &TempDir) -> Config {
    let actions = dir.path().join("actions.json");
    fs::write(
        &actions,
        json!([{"id": 12, "name": "Signed up", "steps": [{"event": "signed_up"}]}]).to_string(),
    )
    .expect("failed to write actions file");

    let mut config = Config::default();
    config.posthog.host = posthog_uri.to_string();
    config.posthog.personal_api_key = Some("phx_test".to_string());
    config.posthog.timeout_secs = 5;
    config.webhook.url = Some(format!("{}/hook", posthog_uri));
    config.webhook.timeout_secs = 5;
    config.export.action_map = Some("12:Signup".to_string());
    config.export.definitions_file = Some(actions);
    config.export.state_path = Some(dir.path().join("state"));
    config.export.retry_backoff_ms = 0;
    config
}

/// Raw event as listed by the events API.
#[allow(dead_code)]
pub fn signup_event(distinct_id: &str, properties: Value) -> Value {
    json!({
        "id": format!("evt-{}", distinct_id),
        "event": "signed_up",
        "distinct_id": distinct_id,
        "timestamp": "2021-11-09T21:58:36.973000+00:00",
        "properties": properties,
        "elements": []
    })
}

/// Events page body.
#[allow(dead_code)]
pub fn page(results: Vec<Value>, next: Option<String>) -> Value {
    json!({ "results": results, "next": next })
}
