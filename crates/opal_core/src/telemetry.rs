use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{json, Number, Value};
use tracing::warn;

use crate::scene::{SceneSnapshot, Vec3};

pub const CHECK_IN_MESSAGE: &str = "Opal tablet checking in!";
pub const GOT_MESSAGE_ACK: &str = "got message";

/// Logical topics on the rosbridge link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Log,
    Action,
    Scene,
    Metrics,
    Command,
}

impl Channel {
    pub fn topic(self) -> &'static str {
        match self {
            Channel::Log => "/opal_tablet",
            Channel::Action => "/opal_tablet_action",
            Channel::Scene => "/opal_tablet_scene",
            Channel::Metrics => "/opal_tablet_metrics",
            Channel::Command => "/opal_command",
        }
    }

    pub fn message_type(self) -> &'static str {
        match self {
            Channel::Log => "std_msgs/String",
            Channel::Action => "sar_opal_msgs/OpalAction",
            Channel::Scene => "sar_opal_msgs/OpalScene",
            Channel::Metrics => "sar_opal_msgs/OpalMetrics",
            Channel::Command => "sar_opal_msgs/OpalCommand",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActionEvent {
    pub object: String,
    pub action_type: String,
    pub position: Option<Vec3>,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LogEvent {
    Action(ActionEvent),
    SceneSnapshot(SceneSnapshot),
    Message(String),
}

impl LogEvent {
    /// Action event stamped with the current wall clock.
    pub fn action(
        object: impl Into<String>,
        action_type: impl Into<String>,
        position: Option<Vec3>,
    ) -> Self {
        LogEvent::Action(ActionEvent {
            object: object.into(),
            action_type: action_type.into(),
            position,
            timestamp_ms: unix_millis_now(),
        })
    }

    pub fn message(text: impl Into<String>) -> Self {
        LogEvent::Message(text.into())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectMetric {
    pub name: String,
    pub distance_to_goal: f32,
}

/// Reserved; nothing in the controller fills this in yet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsReport {
    pub objects: Vec<ObjectMetric>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub channel: Channel,
    pub body: Value,
}

impl OutboundMessage {
    pub fn log(text: impl Into<String>) -> Self {
        Self {
            channel: Channel::Log,
            body: json!({ "data": text.into() }),
        }
    }

    /// Rosbridge publish op, one line of json.
    pub fn to_wire(&self) -> String {
        json!({
            "op": "publish",
            "topic": self.channel.topic(),
            "msg": self.body,
        })
        .to_string()
    }
}

pub fn emit(event: &LogEvent) -> OutboundMessage {
    match event {
        LogEvent::Action(action) => OutboundMessage {
            channel: Channel::Action,
            body: json!({
                "object": action.object,
                "action_type": action.action_type,
                "position": action.position.map(vec3_value).unwrap_or(Value::Null),
                "timestamp_ms": action.timestamp_ms,
            }),
        },
        LogEvent::SceneSnapshot(snapshot) => OutboundMessage {
            channel: Channel::Scene,
            body: serde_json::to_value(snapshot).unwrap_or_else(|error| {
                warn!(error = %error, "scene_snapshot_encode_failed");
                Value::Null
            }),
        },
        LogEvent::Message(text) => OutboundMessage::log(text.as_str()),
    }
}

pub fn emit_metrics(report: &MetricsReport) -> OutboundMessage {
    OutboundMessage {
        channel: Channel::Metrics,
        body: json!({
            "objects": report
                .objects
                .iter()
                .map(|object| {
                    json!({
                        "name": object.name,
                        "distance_to_goal": float_value(object.distance_to_goal),
                    })
                })
                .collect::<Vec<_>>(),
        }),
    }
}

pub fn advertise_op(channel: Channel) -> String {
    json!({
        "op": "advertise",
        "topic": channel.topic(),
        "type": channel.message_type(),
    })
    .to_string()
}

pub fn subscribe_op(channel: Channel) -> String {
    json!({
        "op": "subscribe",
        "topic": channel.topic(),
        "type": channel.message_type(),
    })
    .to_string()
}

/// Lines a freshly connected link sends before anything else.
pub fn handshake_lines() -> Vec<String> {
    vec![
        advertise_op(Channel::Log),
        advertise_op(Channel::Action),
        advertise_op(Channel::Scene),
        subscribe_op(Channel::Command),
        OutboundMessage::log(CHECK_IN_MESSAGE).to_wire(),
    ]
}

pub fn unix_millis_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

fn vec3_value(position: Vec3) -> Value {
    Value::Array(vec![
        float_value(position.x),
        float_value(position.y),
        float_value(position.z),
    ])
}

fn float_value(value: f32) -> Value {
    Number::from_f64(value as f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{SnapshotObject, Tag};

    #[test]
    fn action_event_formats_position_and_timestamp() {
        let event = LogEvent::Action(ActionEvent {
            object: "ball".to_string(),
            action_type: "tap".to_string(),
            position: Some(Vec3::new(1.0, 2.0, 0.0)),
            timestamp_ms: 1_700_000_000_123,
        });
        let message = emit(&event);
        assert_eq!(message.channel, Channel::Action);
        assert_eq!(
            message.body,
            json!({
                "object": "ball",
                "action_type": "tap",
                "position": [1.0, 2.0, 0.0],
                "timestamp_ms": 1_700_000_000_123u64,
            })
        );
    }

    #[test]
    fn action_event_without_position_is_null() {
        let message = emit(&LogEvent::action("ball", "press", None));
        assert_eq!(message.body["position"], Value::Null);
        assert!(message.body["timestamp_ms"].as_u64().expect("timestamp") > 0);
    }

    #[test]
    fn scene_snapshot_formats_objects() {
        let snapshot = SceneSnapshot {
            background: "playground".to_string(),
            objects: vec![SnapshotObject {
                name: "ball".to_string(),
                position: Vec3::new(-200.0, 50.0, -2.0),
                tag: Tag::PlayObject,
            }],
        };
        let message = emit(&LogEvent::SceneSnapshot(snapshot));
        assert_eq!(message.channel, Channel::Scene);
        assert_eq!(
            message.body,
            json!({
                "background": "playground",
                "objects": [{"name": "ball", "position": [-200.0, 50.0, -2.0], "tag": "PlayObject"}],
            })
        );
    }

    #[test]
    fn message_event_goes_to_log_topic() {
        let message = emit(&LogEvent::message("hello"));
        let wire: Value = serde_json::from_str(&message.to_wire()).expect("wire json");
        assert_eq!(
            wire,
            json!({"op": "publish", "topic": "/opal_tablet", "msg": {"data": "hello"}})
        );
    }

    #[test]
    fn metrics_channel_is_formatted_but_reserved() {
        let message = emit_metrics(&MetricsReport {
            objects: vec![ObjectMetric {
                name: "ball".to_string(),
                distance_to_goal: 2.5,
            }],
        });
        assert_eq!(message.channel.topic(), "/opal_tablet_metrics");
        assert_eq!(
            message.body,
            json!({"objects": [{"name": "ball", "distance_to_goal": 2.5}]})
        );
    }

    #[test]
    fn handshake_advertises_then_subscribes_then_checks_in() {
        let lines = handshake_lines()
            .iter()
            .map(|line| serde_json::from_str::<Value>(line).expect("json"))
            .collect::<Vec<_>>();
        assert_eq!(lines[0]["op"], "advertise");
        assert_eq!(lines[0]["topic"], "/opal_tablet");
        assert_eq!(lines[3]["op"], "subscribe");
        assert_eq!(lines[3]["topic"], "/opal_command");
        assert_eq!(lines[3]["type"], "sar_opal_msgs/OpalCommand");
        assert_eq!(lines[4]["msg"]["data"], CHECK_IN_MESSAGE);
    }
}
