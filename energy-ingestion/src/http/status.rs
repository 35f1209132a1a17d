use axum::{extract::State, response::Html, Json};
use serde_json::{json, Value};

use super::AppState;
use crate::store::TelemetryBackend;

const STATUS_PAGE: &str = r#"<!DOCTYPE html>
<html>
  <head>
    <title>Energy Ingestion Engine</title>
    <style>
      body { font-family: system-ui, sans-serif; text-align: center; padding: 48px; background: #0f172a; color: #f1f5f9; }
      .panel { display: inline-block; padding: 32px 48px; border-radius: 10px; background: #1e293b; border: 1px solid #334155; }
      h1 { color: #22c55e; }
      .online { padding: 4px 12px; border-radius: 16px; background: #064e3b; color: #4ade80; font-weight: bold; }
      code { padding: 2px 6px; border-radius: 4px; background: #020617; color: #facc15; }
    </style>
  </head>
  <body>
    <div class="panel">
      <h1>Energy Ingestion Engine</h1>
      <p><span class="online">ONLINE</span></p>
      <p>Storage backend: <code>{storage}</code></p>
      <p>POST readings to <code>/v1/telemetry/meter</code> and <code>/v1/telemetry/vehicle</code></p>
      <p>Version <code>{version}</code></p>
    </div>
  </body>
</html>
"#;

pub async fn index<S: TelemetryBackend>(State(state): State<AppState<S>>) -> Html<String> {
    Html(
        STATUS_PAGE
            .replace("{storage}", state.storage.as_str())
            .replace("{version}", env!("CARGO_PKG_VERSION")),
    )
}

pub async fn health<S: TelemetryBackend>(State(state): State<AppState<S>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "storage": state.storage.as_str(),
    }))
}
