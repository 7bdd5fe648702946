use serde::Deserialize;
use tracing::warn;

use crate::event::ClientEvent;

const DEFAULT_TITLE: &str = "Kiduka POS";
const DEFAULT_BODY: &str = "You have a new notification";
const DEFAULT_URL: &str = "/";

#[derive(Debug, Default, Deserialize)]
struct PushPayload {
  title: Option<String>,
  body: Option<String>,
  url: Option<String>,
}

/// Turn a push payload into a notification event.
///
/// Missing fields and unparseable payloads fall back to defaults.
pub fn notification(raw: &[u8]) -> ClientEvent {
  let payload = if raw.is_empty() {
    PushPayload::default()
  } else {
    serde_json::from_slice(raw).unwrap_or_else(|e| {
      warn!(error = %e, "malformed push payload, using default notification");
      PushPayload::default()
    })
  };

  ClientEvent::Notification {
    title: payload.title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
    body: payload.body.unwrap_or_else(|| DEFAULT_BODY.to_string()),
    url: payload.url.unwrap_or_else(|| DEFAULT_URL.to_string()),
  }
}
