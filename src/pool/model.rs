//! Poll data model: poll results, broadcast events, and channel message types.

use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ChannelError;

/// Broadcast topic. Each message kind travels on its own topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// An agent announces candidacy as the active poller for a key.
    ClaimKey,
    /// One poll attempt finished and another one is scheduled.
    Ran,
    /// Final outcome for a key.
    Done,
}

impl Topic {
    /// Every topic a pool subscribes to.
    pub const ALL: [Topic; 3] = [Topic::ClaimKey, Topic::Ran, Topic::Done];

    /// Topic name on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClaimKey => "claimKey",
            Self::Ran => "ran",
            Self::Done => "done",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Topic {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "claimKey" => Ok(Self::ClaimKey),
            "ran" => Ok(Self::Ran),
            "done" => Ok(Self::Done),
            _ => Err(format!("Unknown topic: {}", s)),
        }
    }
}

/// Outcome of one poller run.
///
/// `next` is the reschedule delay in milliseconds. Absent or zero means the
/// job is complete. Any other fields are carried through to listeners as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PollResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<u64>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl PollResult {
    /// A result asking to run again after `millis` milliseconds.
    pub fn reschedule(millis: u64) -> Self {
        Self {
            next: Some(millis),
            fields: Map::new(),
        }
    }

    /// A final result with no fields.
    pub fn complete() -> Self {
        Self::default()
    }

    /// Attach a field to the result.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Look up a carried field.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Delay before the next attempt, or `None` when the job is complete.
    pub fn next_delay(&self) -> Option<Duration> {
        self.next.filter(|ms| *ms > 0).map(Duration::from_millis)
    }

    /// Normalize an arbitrary JSON value into a result.
    ///
    /// A bare number is shorthand for `{next: n}`. Objects are taken field by
    /// field. Anything else is wrapped as `{value: ..}`.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Number(n) => {
                let millis = n
                    .as_u64()
                    .or_else(|| n.as_f64().filter(|f| *f > 0.0).map(|f| f.round() as u64))
                    .unwrap_or(0);
                Self::reschedule(millis)
            }
            Value::Object(mut fields) => {
                let next = fields.remove("next").and_then(|v| match v {
                    Value::Number(n) => n
                        .as_u64()
                        .or_else(|| n.as_f64().filter(|f| *f > 0.0).map(|f| f.round() as u64)),
                    _ => None,
                });
                Self { next, fields }
            }
            other => Self::complete().with_field("value", other),
        }
    }
}

impl From<u64> for PollResult {
    fn from(millis: u64) -> Self {
        Self::reschedule(millis)
    }
}

impl From<Value> for PollResult {
    fn from(value: Value) -> Self {
        Self::from_value(value)
    }
}

/// A claim announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub key: String,
    #[serde(alias = "agentName")]
    pub agent: String,
}

/// Details of a `ran` or `done` broadcast. This is what listeners receive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollEvent {
    pub key: String,
    pub result: PollResult,
    /// Epoch milliseconds at which the poll run finished.
    pub time: i64,
    /// Set on a `done` when the active poller failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PollEvent {
    /// Stamp a result with the current time.
    pub fn now(key: impl Into<String>, result: PollResult) -> Self {
        Self {
            key: key.into(),
            result,
            time: Utc::now().timestamp_millis(),
            error: None,
        }
    }

    /// A terminal event describing a poller failure.
    pub fn failed(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
            ..Self::now(key, PollResult::complete())
        }
    }
}

/// A validated message on one of the pool topics.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    ClaimKey(Claim),
    Ran(PollEvent),
    Done(PollEvent),
}

impl ChannelMessage {
    /// Topic this message is published on.
    pub fn topic(&self) -> Topic {
        match self {
            Self::ClaimKey(_) => Topic::ClaimKey,
            Self::Ran(_) => Topic::Ran,
            Self::Done(_) => Topic::Done,
        }
    }

    /// Job key the message refers to.
    pub fn key(&self) -> &str {
        match self {
            Self::ClaimKey(claim) => &claim.key,
            Self::Ran(event) | Self::Done(event) => &event.key,
        }
    }

    /// Serialize into the wire payload for this message's topic.
    pub fn to_payload(&self) -> Result<Value, ChannelError> {
        let payload = match self {
            Self::ClaimKey(claim) => serde_json::to_value(claim)?,
            Self::Ran(event) | Self::Done(event) => serde_json::to_value(event)?,
        };
        Ok(payload)
    }

    /// Parse and validate a payload received on `topic`.
    pub fn from_payload(topic: Topic, payload: Value) -> Result<Self, ChannelError> {
        let message = match topic {
            Topic::ClaimKey => {
                let claim: Claim = serde_json::from_value(payload)?;
                if claim.agent.is_empty() {
                    return Err(ChannelError::InvalidMessage(format!(
                        "claimKey for {} has no agent",
                        claim.key
                    )));
                }
                Self::ClaimKey(claim)
            }
            Topic::Ran => {
                let event: PollEvent = serde_json::from_value(payload)?;
                if event.result.next_delay().is_none() {
                    return Err(ChannelError::InvalidMessage(format!(
                        "ran for {} carries no next delay",
                        event.key
                    )));
                }
                Self::Ran(event)
            }
            Topic::Done => Self::Done(serde_json::from_value(payload)?),
        };

        if message.key().is_empty() {
            return Err(ChannelError::InvalidMessage(format!(
                "{} message has an empty key",
                topic
            )));
        }
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bare_number_is_reschedule() {
        let result = PollResult::from_value(json!(100));
        assert_eq!(result, PollResult::reschedule(100));
        assert_eq!(result.next_delay(), Some(Duration::from_millis(100)));
        assert_eq!(PollResult::from(100u64), result);
    }

    #[test]
    fn zero_next_means_complete() {
        let result = PollResult::from_value(json!({"next": 0, "ok": true}));
        assert!(result.next_delay().is_none());
        assert_eq!(result.get("ok"), Some(&json!(true)));
    }

    #[test]
    fn object_without_next_is_complete() {
        let result = PollResult::from_value(json!({"ok": true}));
        assert_eq!(result.next, None);
        assert!(result.next_delay().is_none());
    }

    #[test]
    fn non_object_values_are_wrapped() {
        let result = PollResult::from_value(json!("finished"));
        assert!(result.next_delay().is_none());
        assert_eq!(result.get("value"), Some(&json!("finished")));
    }

    #[test]
    fn ran_payload_shape() {
        let event = PollEvent::now("sharedjob", PollResult::reschedule(100).with_field("page", 2));
        let payload = ChannelMessage::Ran(event.clone()).to_payload().unwrap();
        assert_eq!(payload["key"], "sharedjob");
        assert_eq!(payload["result"]["next"], 100);
        assert_eq!(payload["result"]["page"], 2);
        assert!(payload["time"].is_i64());
        assert!(payload.get("error").is_none());

        let parsed = ChannelMessage::from_payload(Topic::Ran, payload).unwrap();
        assert_eq!(parsed, ChannelMessage::Ran(event));
    }

    #[test]
    fn claim_accepts_agent_name_alias() {
        let parsed = ChannelMessage::from_payload(
            Topic::ClaimKey,
            json!({"key": "k", "agentName": "host:1"}),
        )
        .unwrap();
        assert_eq!(
            parsed,
            ChannelMessage::ClaimKey(Claim {
                key: "k".into(),
                agent: "host:1".into()
            })
        );
    }

    #[test]
    fn ran_without_next_is_rejected() {
        let err = ChannelMessage::from_payload(
            Topic::Ran,
            json!({"key": "k", "result": {"ok": true}, "time": 1}),
        )
        .unwrap_err();
        assert!(matches!(err, ChannelError::InvalidMessage(_)));
    }

    #[test]
    fn empty_key_is_rejected() {
        let err = ChannelMessage::from_payload(
            Topic::Done,
            json!({"key": "", "result": {}, "time": 1}),
        )
        .unwrap_err();
        assert!(matches!(err, ChannelError::InvalidMessage(_)));
    }

    #[test]
    fn missing_fields_are_rejected() {
        let err = ChannelMessage::from_payload(Topic::Done, json!({"key": "k"})).unwrap_err();
        assert!(matches!(err, ChannelError::Json(_)));
    }

    #[test]
    fn failed_event_carries_error() {
        let event = PollEvent::failed("k", "upstream 503");
        let payload = ChannelMessage::Done(event).to_payload().unwrap();
        assert_eq!(payload["error"], "upstream 503");
        assert!(payload["result"].as_object().unwrap().is_empty());
    }

    #[test]
    fn topic_names() {
        assert_eq!(Topic::ClaimKey.to_string(), "claimKey");
        assert_eq!("ran".parse::<Topic>().unwrap(), Topic::Ran);
        assert!("other".parse::<Topic>().is_err());
    }
}
