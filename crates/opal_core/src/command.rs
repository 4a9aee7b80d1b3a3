use std::fmt;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::scene::{EntitySpec, ObjectProperties, Tag, Vec3};

const EXPECT_ENTITY_SPEC: &str = "entity spec object {name, tag, initPosition}";
const EXPECT_MOVE: &str = "object {name, destination:[x,y,z]}";
const EXPECT_STRING: &str = "string";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Reset,
    DisableTouch,
    EnableTouch,
    SidekickDo,
    SidekickSay,
    LoadObject,
    Clear,
    MoveObject,
    HighlightObject,
    RequestKeyframe,
    GotToGoal,
}

impl CommandKind {
    pub const ALL: [CommandKind; 11] = [
        CommandKind::Reset,
        CommandKind::DisableTouch,
        CommandKind::EnableTouch,
        CommandKind::SidekickDo,
        CommandKind::SidekickSay,
        CommandKind::LoadObject,
        CommandKind::Clear,
        CommandKind::MoveObject,
        CommandKind::HighlightObject,
        CommandKind::RequestKeyframe,
        CommandKind::GotToGoal,
    ];

    pub fn from_code(code: i64) -> Option<Self> {
        let kind = match code {
            0 => CommandKind::Reset,
            1 => CommandKind::DisableTouch,
            2 => CommandKind::EnableTouch,
            3 => CommandKind::SidekickDo,
            4 => CommandKind::SidekickSay,
            5 => CommandKind::LoadObject,
            6 => CommandKind::Clear,
            7 => CommandKind::MoveObject,
            8 => CommandKind::HighlightObject,
            9 => CommandKind::RequestKeyframe,
            10 => CommandKind::GotToGoal,
            _ => return None,
        };
        Some(kind)
    }

    pub fn code(self) -> i64 {
        match self {
            CommandKind::Reset => 0,
            CommandKind::DisableTouch => 1,
            CommandKind::EnableTouch => 2,
            CommandKind::SidekickDo => 3,
            CommandKind::SidekickSay => 4,
            CommandKind::LoadObject => 5,
            CommandKind::Clear => 6,
            CommandKind::MoveObject => 7,
            CommandKind::HighlightObject => 8,
            CommandKind::RequestKeyframe => 9,
            CommandKind::GotToGoal => 10,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CommandKind::Reset => "reset",
            CommandKind::DisableTouch => "disable_touch",
            CommandKind::EnableTouch => "enable_touch",
            CommandKind::SidekickDo => "sidekick_do",
            CommandKind::SidekickSay => "sidekick_say",
            CommandKind::LoadObject => "load_object",
            CommandKind::Clear => "clear",
            CommandKind::MoveObject => "move_object",
            CommandKind::HighlightObject => "highlight_object",
            CommandKind::RequestKeyframe => "request_keyframe",
            CommandKind::GotToGoal => "got_to_goal",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Reset,
    DisableTouch,
    EnableTouch,
    SidekickDo(String),
    SidekickSay(String),
    LoadObject(EntitySpec),
    Clear,
    MoveObject { name: String, destination: Vec3 },
    HighlightObject(String),
    RequestKeyframe,
    GotToGoal,
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Reset => CommandKind::Reset,
            Command::DisableTouch => CommandKind::DisableTouch,
            Command::EnableTouch => CommandKind::EnableTouch,
            Command::SidekickDo(_) => CommandKind::SidekickDo,
            Command::SidekickSay(_) => CommandKind::SidekickSay,
            Command::LoadObject(_) => CommandKind::LoadObject,
            Command::Clear => CommandKind::Clear,
            Command::MoveObject { .. } => CommandKind::MoveObject,
            Command::HighlightObject(_) => CommandKind::HighlightObject,
            Command::RequestKeyframe => CommandKind::RequestKeyframe,
            Command::GotToGoal => CommandKind::GotToGoal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("command record is not valid json: {0}")]
    InvalidJson(String),
    #[error("unsupported rosbridge op '{op}'")]
    UnsupportedOp { op: String },
    #[error("command record has no code")]
    MissingCode,
    #[error("command code is not an integer: {raw}")]
    InvalidCode { raw: String },
    #[error("unknown command code {0}")]
    UnknownCode(i64),
    #[error("{command} requires a payload ({expected}), got none")]
    MissingPayload {
        command: CommandKind,
        expected: &'static str,
    },
    #[error("{command} payload is malformed (expected {expected}): {detail}")]
    InvalidPayload {
        command: CommandKind,
        expected: &'static str,
        detail: String,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEntitySpec {
    name: Option<String>,
    tag: Option<String>,
    draggable: Option<bool>,
    audio_file: Option<String>,
    init_position: Option<Vec3>,
}

#[derive(Debug, Deserialize)]
struct RawMoveObject {
    name: String,
    destination: Vec3,
}

/// Decodes one command record. Accepts a bare `{code, props}` object or a
/// rosbridge publish envelope whose `msg` holds the record.
pub fn decode_message(raw: &str) -> Result<Command, DecodeError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|error| DecodeError::InvalidJson(error.to_string()))?;
    let record = unwrap_envelope(&value)?;

    let code = match record.get("code") {
        None | Some(Value::Null) => return Err(DecodeError::MissingCode),
        Some(code) => code.as_i64().ok_or_else(|| DecodeError::InvalidCode {
            raw: code.to_string(),
        })?,
    };
    let props = record.get("props").filter(|props| !props.is_null());
    decode(code, props)
}

fn unwrap_envelope(value: &Value) -> Result<&Value, DecodeError> {
    match value.get("op") {
        None => Ok(value),
        Some(Value::String(op)) if op == "publish" => Ok(value.get("msg").unwrap_or(&Value::Null)),
        Some(op) => Err(DecodeError::UnsupportedOp {
            op: op.as_str().map(str::to_string).unwrap_or_else(|| op.to_string()),
        }),
    }
}

/// Maps a numeric code and optional payload to a typed command.
pub fn decode(code: i64, props: Option<&Value>) -> Result<Command, DecodeError> {
    let kind = CommandKind::from_code(code).ok_or(DecodeError::UnknownCode(code))?;
    let command = match kind {
        CommandKind::Reset => Command::Reset,
        CommandKind::DisableTouch => Command::DisableTouch,
        CommandKind::EnableTouch => Command::EnableTouch,
        CommandKind::Clear => Command::Clear,
        CommandKind::RequestKeyframe => Command::RequestKeyframe,
        CommandKind::GotToGoal => Command::GotToGoal,
        CommandKind::SidekickDo => Command::SidekickDo(require_string(kind, props)?),
        CommandKind::SidekickSay => Command::SidekickSay(require_string(kind, props)?),
        CommandKind::HighlightObject => Command::HighlightObject(require_string(kind, props)?),
        CommandKind::LoadObject => {
            let props = require_props(kind, props, EXPECT_ENTITY_SPEC)?;
            let raw: RawEntitySpec = deserialize_payload(kind, EXPECT_ENTITY_SPEC, props)?;
            Command::LoadObject(entity_spec_from_raw(raw)?)
        }
        CommandKind::MoveObject => {
            let props = require_props(kind, props, EXPECT_MOVE)?;
            let raw: RawMoveObject = deserialize_payload(kind, EXPECT_MOVE, props)?;
            Command::MoveObject {
                destination: require_finite(kind, EXPECT_MOVE, "destination", raw.destination)?,
                name: raw.name,
            }
        }
    };
    Ok(command)
}

fn require_props<'a>(
    command: CommandKind,
    props: Option<&'a Value>,
    expected: &'static str,
) -> Result<&'a Value, DecodeError> {
    match props {
        Some(value) if !value.is_null() => Ok(value),
        _ => Err(DecodeError::MissingPayload { command, expected }),
    }
}

fn require_string(command: CommandKind, props: Option<&Value>) -> Result<String, DecodeError> {
    match require_props(command, props, EXPECT_STRING)? {
        Value::String(text) => Ok(text.clone()),
        other => Err(DecodeError::InvalidPayload {
            command,
            expected: EXPECT_STRING,
            detail: format!("got {}", json_type_name(other)),
        }),
    }
}

fn deserialize_payload<T: DeserializeOwned>(
    command: CommandKind,
    expected: &'static str,
    props: &Value,
) -> Result<T, DecodeError> {
    serde_path_to_error::deserialize::<_, T>(props).map_err(|error| {
        let path = error.path().to_string();
        let source = error.into_inner();
        let detail = if path.is_empty() || path == "." {
            source.to_string()
        } else {
            format!("at {path}: {source}")
        };
        DecodeError::InvalidPayload {
            command,
            expected,
            detail,
        }
    })
}

fn entity_spec_from_raw(raw: RawEntitySpec) -> Result<EntitySpec, DecodeError> {
    let invalid = |detail: String| DecodeError::InvalidPayload {
        command: CommandKind::LoadObject,
        expected: EXPECT_ENTITY_SPEC,
        detail,
    };

    let tag_raw = raw.tag.ok_or_else(|| invalid("missing field `tag`".to_string()))?;
    let tag = Tag::parse(&tag_raw).ok_or_else(|| invalid(format!("unknown tag '{tag_raw}'")))?;
    let name = raw
        .name
        .ok_or_else(|| invalid("missing field `name`".to_string()))?;
    let properties = ObjectProperties {
        name,
        init_position: require_finite(
            CommandKind::LoadObject,
            EXPECT_ENTITY_SPEC,
            "initPosition",
            raw.init_position.unwrap_or(Vec3::ZERO),
        )?,
    };

    Ok(match tag {
        Tag::Background => EntitySpec::Background(properties),
        Tag::PlayObject => EntitySpec::PlayObject {
            properties,
            draggable: raw.draggable.unwrap_or(false),
            audio_file: raw.audio_file.filter(|file| !file.is_empty()),
        },
    })
}

/// Coordinates beyond f32 range come out of serde as infinities.
fn require_finite(
    command: CommandKind,
    expected: &'static str,
    field: &str,
    position: Vec3,
) -> Result<Vec3, DecodeError> {
    if position.is_finite() {
        return Ok(position);
    }
    Err(DecodeError::InvalidPayload {
        command,
        expected,
        detail: format!("at {field}: coordinate out of range {position}"),
    })
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn codes_round_trip_through_kind() {
        for kind in CommandKind::ALL {
            assert_eq!(CommandKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(CommandKind::from_code(11), None);
        assert_eq!(CommandKind::from_code(-1), None);
    }

    #[test]
    fn payload_free_commands_ignore_props() {
        assert_eq!(decode(0, None), Ok(Command::Reset));
        assert_eq!(decode(1, None), Ok(Command::DisableTouch));
        assert_eq!(decode(2, Some(&json!("ignored"))), Ok(Command::EnableTouch));
        assert_eq!(decode(6, None), Ok(Command::Clear));
        assert_eq!(decode(9, None), Ok(Command::RequestKeyframe));
        assert_eq!(decode(10, None), Ok(Command::GotToGoal));
    }

    #[test]
    fn unknown_code_is_rejected() {
        assert_eq!(decode(42, None), Err(DecodeError::UnknownCode(42)));
        assert_eq!(
            decode_message(r#"{"code": 99}"#),
            Err(DecodeError::UnknownCode(99))
        );
    }

    #[test]
    fn load_play_object_scenario() {
        let command = decode_message(
            r#"{"code":5,"props":{"name":"ball","tag":"PlayObject","draggable":true,"initPosition":[-200,50,-2]}}"#,
        )
        .expect("decode");
        assert_eq!(
            command,
            Command::LoadObject(EntitySpec::PlayObject {
                properties: ObjectProperties {
                    name: "ball".to_string(),
                    init_position: Vec3::new(-200.0, 50.0, -2.0),
                },
                draggable: true,
                audio_file: None,
            })
        );
    }

    #[test]
    fn load_background_defaults_position_to_origin() {
        let command = decode(5, Some(&json!({"name": "playground", "tag": "Background"})))
            .expect("decode");
        assert_eq!(
            command,
            Command::LoadObject(EntitySpec::Background(ObjectProperties {
                name: "playground".to_string(),
                init_position: Vec3::ZERO,
            }))
        );
    }

    #[test]
    fn load_object_with_audio_file() {
        let command = decode(
            5,
            Some(&json!({
                "name": "bell",
                "tag": "PlayObject",
                "audioFile": "chimes",
                "initPosition": [1, 2, 3]
            })),
        )
        .expect("decode");
        let Command::LoadObject(EntitySpec::PlayObject {
            draggable,
            audio_file,
            ..
        }) = command
        else {
            panic!("expected play object spec");
        };
        assert!(!draggable);
        assert_eq!(audio_file.as_deref(), Some("chimes"));
    }

    #[test]
    fn load_object_null_props_is_missing_payload() {
        let error = decode_message(r#"{"code":5,"props":null}"#).expect_err("must fail");
        assert!(matches!(
            error,
            DecodeError::MissingPayload {
                command: CommandKind::LoadObject,
                ..
            }
        ));
    }

    #[test]
    fn load_object_requires_known_tag_and_name() {
        let unknown_tag = decode(5, Some(&json!({"name": "x", "tag": "Light"})));
        assert!(
            matches!(unknown_tag, Err(DecodeError::InvalidPayload { ref detail, .. }) if detail.contains("Light"))
        );

        let missing_name = decode(5, Some(&json!({"tag": "PlayObject"})));
        assert!(
            matches!(missing_name, Err(DecodeError::InvalidPayload { ref detail, .. }) if detail.contains("name"))
        );

        let wrong_shape = decode(5, Some(&json!("ball")));
        assert!(matches!(
            wrong_shape,
            Err(DecodeError::InvalidPayload {
                command: CommandKind::LoadObject,
                ..
            })
        ));
    }

    #[test]
    fn bad_position_reports_field_path() {
        let error = decode(
            5,
            Some(&json!({"name": "x", "tag": "PlayObject", "initPosition": [1, 2]})),
        )
        .expect_err("must fail");
        let DecodeError::InvalidPayload { detail, .. } = error else {
            panic!("expected invalid payload");
        };
        assert!(detail.contains("initPosition"), "{detail}");
    }

    #[test]
    fn out_of_range_coordinates_are_rejected() {
        let load = decode_message(
            r#"{"code":5,"props":{"name":"ball","tag":"PlayObject","initPosition":[1e39,0,0]}}"#,
        );
        let Err(DecodeError::InvalidPayload {
            command: CommandKind::LoadObject,
            detail,
            ..
        }) = load
        else {
            panic!("expected invalid payload");
        };
        assert!(detail.contains("initPosition"), "{detail}");

        let moved =
            decode_message(r#"{"code":7,"props":{"name":"ball","destination":[0,-1e40,0]}}"#);
        assert!(matches!(
            moved,
            Err(DecodeError::InvalidPayload {
                command: CommandKind::MoveObject,
                ..
            })
        ));
    }

    #[test]
    fn move_object_scenario() {
        let command =
            decode_message(r#"{"code":7,"props":{"name":"ball","destination":[0,0,-2]}}"#)
                .expect("decode");
        assert_eq!(
            command,
            Command::MoveObject {
                name: "ball".to_string(),
                destination: Vec3::new(0.0, 0.0, -2.0),
            }
        );

        let missing_destination = decode(7, Some(&json!({"name": "ball"})));
        assert!(matches!(
            missing_destination,
            Err(DecodeError::InvalidPayload {
                command: CommandKind::MoveObject,
                ..
            })
        ));
        assert!(matches!(
            decode(7, None),
            Err(DecodeError::MissingPayload {
                command: CommandKind::MoveObject,
                ..
            })
        ));
    }

    #[test]
    fn string_commands_require_strings() {
        assert_eq!(
            decode(3, Some(&json!("wave"))),
            Ok(Command::SidekickDo("wave".to_string()))
        );
        assert_eq!(
            decode(4, Some(&json!("hello"))),
            Ok(Command::SidekickSay("hello".to_string()))
        );
        assert_eq!(
            decode(8, Some(&json!("ball"))),
            Ok(Command::HighlightObject("ball".to_string()))
        );
        assert_eq!(
            decode(4, Some(&json!(12))),
            Err(DecodeError::InvalidPayload {
                command: CommandKind::SidekickSay,
                expected: EXPECT_STRING,
                detail: "got number".to_string(),
            })
        );
        assert!(matches!(
            decode(3, None),
            Err(DecodeError::MissingPayload { .. })
        ));
    }

    #[test]
    fn record_level_errors() {
        assert!(matches!(
            decode_message("not json"),
            Err(DecodeError::InvalidJson(_))
        ));
        assert_eq!(decode_message(r#"{"props":1}"#), Err(DecodeError::MissingCode));
        assert_eq!(
            decode_message(r#"{"code":"5"}"#),
            Err(DecodeError::InvalidCode {
                raw: "\"5\"".to_string()
            })
        );
    }

    #[test]
    fn rosbridge_envelope_is_unwrapped() {
        let command = decode_message(
            r#"{"op":"publish","topic":"/opal_command","msg":{"code":8,"props":"ball"}}"#,
        )
        .expect("decode");
        assert_eq!(command, Command::HighlightObject("ball".to_string()));

        assert_eq!(
            decode_message(r#"{"op":"advertise","topic":"/opal_command"}"#),
            Err(DecodeError::UnsupportedOp {
                op: "advertise".to_string()
            })
        );
    }
}
