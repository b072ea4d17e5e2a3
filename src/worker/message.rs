use serde::Deserialize;

/// What a handler asks the host to do once its work is complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
  /// Activate now instead of waiting for existing instances to release control
  SkipWaiting,
  /// Take control of all open instances of the application
  ClaimClients,
}

/// Control messages posted to the worker by the application.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
  #[serde(rename = "SKIP_WAITING")]
  SkipWaiting,
}

impl ControlMessage {
  /// Interpret a raw message payload.
  ///
  /// Payloads without a recognised `type` are not control messages.
  pub fn from_payload(payload: &serde_json::Value) -> Option<Self> {
    serde_json::from_value(payload.clone()).ok()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_skip_waiting_payload() {
    assert_eq!(
      ControlMessage::from_payload(&json!({ "type": "SKIP_WAITING" })),
      Some(ControlMessage::SkipWaiting)
    );
  }

  #[test]
  fn test_extra_fields_are_ignored() {
    assert_eq!(
      ControlMessage::from_payload(&json!({ "type": "SKIP_WAITING", "from": "banner" })),
      Some(ControlMessage::SkipWaiting)
    );
  }

  #[test]
  fn test_unrecognised_payloads() {
    assert_eq!(ControlMessage::from_payload(&json!({ "type": "RELOAD" })), None);
    assert_eq!(ControlMessage::from_payload(&json!({ "kind": "SKIP_WAITING" })), None);
    assert_eq!(ControlMessage::from_payload(&json!("SKIP_WAITING")), None);
    assert_eq!(ControlMessage::from_payload(&serde_json::Value::Null), None);
  }
}
