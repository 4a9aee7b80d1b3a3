use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::net::TcpStream;
use std::thread;
use std::time::{Duration, Instant};

use serde_json::{json, Value};

pub const DEFAULT_PORT: u16 = 9090;
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_RETRY_MS: u64 = 100;
pub const DEFAULT_QUIET_MS: u64 = 250;
const MAX_RETRY_BACKOFF_MS: u64 = 1_000;

pub const CHECK_IN_PAYLOAD: &str = "Opal tablet checking in!";
pub const ACK_PAYLOAD: &str = "got message";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineChannel {
    Log,
    Action,
    Scene,
    Metrics,
    Control,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLine {
    pub channel: LineChannel,
    pub payload: String,
}

#[derive(Debug, Clone, Copy)]
pub struct CommonOptions {
    pub port: u16,
    pub timeout_ms: u64,
    pub retry_ms: u64,
    pub include_telemetry: bool,
}

impl Default for CommonOptions {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            retry_ms: DEFAULT_RETRY_MS,
            include_telemetry: false,
        }
    }
}

pub enum CommandKind {
    WaitReady,
    Send { record: String },
    Script { path: String },
}

struct Session {
    writer: TcpStream,
    reader: BufReader<TcpStream>,
}

/// Classifies one line from the tablet. Log publishes carry their text as
/// the payload; other topics carry the compact message json.
pub fn parse_wire_line(raw: &str) -> ParsedLine {
    let trimmed = raw.trim_end_matches(['\r', '\n']);
    let unknown = || ParsedLine {
        channel: LineChannel::Unknown,
        payload: trimmed.to_string(),
    };
    let Ok(value) = serde_json::from_str::<Value>(trimmed) else {
        return unknown();
    };
    let topic = value["topic"].as_str().unwrap_or_default();

    match value["op"].as_str() {
        Some("publish") => {
            let msg = &value["msg"];
            let channel = match topic {
                "/opal_tablet" => LineChannel::Log,
                "/opal_tablet_action" => LineChannel::Action,
                "/opal_tablet_scene" => LineChannel::Scene,
                "/opal_tablet_metrics" => LineChannel::Metrics,
                _ => return unknown(),
            };
            let payload = match (channel, msg["data"].as_str()) {
                (LineChannel::Log, Some(text)) => text.to_string(),
                _ => msg.to_string(),
            };
            ParsedLine { channel, payload }
        }
        Some(op @ ("advertise" | "subscribe")) => ParsedLine {
            channel: LineChannel::Control,
            payload: format!("{op} {topic}"),
        },
        _ => unknown(),
    }
}

pub fn should_print_line(line: &ParsedLine, include_telemetry: bool) -> bool {
    match line.channel {
        LineChannel::Log => true,
        LineChannel::Action | LineChannel::Scene | LineChannel::Metrics => include_telemetry,
        LineChannel::Control | LineChannel::Unknown => false,
    }
}

pub fn is_ready_line(line: &ParsedLine) -> bool {
    line.channel == LineChannel::Log && line.payload == CHECK_IN_PAYLOAD
}

pub fn is_ack_line(line: &ParsedLine) -> bool {
    line.channel == LineChannel::Log && line.payload == ACK_PAYLOAD
}

pub fn command_record(code: u8, props: Option<Value>) -> String {
    match props {
        Some(props) => json!({ "code": code, "props": props }).to_string(),
        None => json!({ "code": code }).to_string(),
    }
}

/// Builds a command record from a helper subcommand such as
/// `move ball 0 0 -2` or `touch off`.
pub fn helper_record(name: &str, args: &[String]) -> Result<String, String> {
    let record = match name {
        "reset" => {
            expect_no_args(name, args)?;
            command_record(0, None)
        }
        "touch" => match args {
            [state] if state == "off" => command_record(1, None),
            [state] if state == "on" => command_record(2, None),
            _ => return Err("touch requires 'on' or 'off'".to_string()),
        },
        "do" => command_record(3, Some(Value::String(require_text(name, args)?))),
        "say" => command_record(4, Some(Value::String(require_text(name, args)?))),
        "load-background" => {
            let (entity_name, rest) = split_name(name, args)?;
            let position = parse_optional_position(name, rest)?;
            command_record(
                5,
                Some(json!({
                    "name": entity_name,
                    "tag": "Background",
                    "initPosition": position,
                })),
            )
        }
        "load-object" => command_record(5, Some(parse_play_object(args)?)),
        "clear" => {
            expect_no_args(name, args)?;
            command_record(6, None)
        }
        "move" => {
            let (entity_name, rest) = split_name(name, args)?;
            if rest.len() != 3 {
                return Err("move requires <name> <x> <y> <z>".to_string());
            }
            command_record(
                7,
                Some(json!({
                    "name": entity_name,
                    "destination": parse_position(name, rest)?,
                })),
            )
        }
        "highlight" => command_record(8, Some(Value::String(require_text(name, args)?))),
        "keyframe" => {
            expect_no_args(name, args)?;
            command_record(9, None)
        }
        "goal" => {
            expect_no_args(name, args)?;
            command_record(10, None)
        }
        other => return Err(format!("unknown subcommand '{other}'")),
    };
    Ok(record)
}

/// Script lines are either raw json records or helper invocations.
pub fn parse_script_commands(content: &str) -> Result<Vec<String>, String> {
    let mut records = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let record = if trimmed.starts_with('{') {
            validate_record(trimmed)?
        } else {
            let mut words = trimmed.split_whitespace().map(ToString::to_string);
            let name = words.next().unwrap_or_default();
            let args = words.collect::<Vec<_>>();
            helper_record(&name, &args).map_err(|error| format!("line {}: {error}", index + 1))?
        };
        records.push(record);
    }
    Ok(records)
}

/// Checks that `raw` is a json object and returns it compacted to one line.
pub fn validate_record(raw: &str) -> Result<String, String> {
    let value = serde_json::from_str::<Value>(raw)
        .map_err(|error| format!("command record is not valid json: {error}"))?;
    if !value.is_object() {
        return Err("command record must be a json object".to_string());
    }
    Ok(value.to_string())
}

pub fn run<W: Write>(kind: CommandKind, opts: CommonOptions, stdout: &mut W) -> Result<(), String> {
    let timeout = Duration::from_millis(opts.timeout_ms);
    let retry_base = Duration::from_millis(opts.retry_ms.max(1));
    let records = match kind {
        CommandKind::WaitReady => Vec::new(),
        CommandKind::Send { record } => vec![record],
        CommandKind::Script { path } => {
            let content = fs::read_to_string(&path)
                .map_err(|error| format!("failed to read script file '{path}': {error}"))?;
            parse_script_commands(&content)?
        }
    };

    let mut session = connect_and_wait_ready(opts.port, timeout, retry_base, |line| {
        emit_line(stdout, line, opts.include_telemetry)
    })?;

    for record in records {
        send_line(&mut session.writer, &record)?;
        wait_for_ack(&mut session.reader, timeout, |line| {
            emit_line(stdout, line, opts.include_telemetry)
        })?;
        read_until_quiet(
            &mut session.reader,
            timeout,
            Duration::from_millis(DEFAULT_QUIET_MS),
            |line| emit_line(stdout, line, opts.include_telemetry),
        )?;
    }
    Ok(())
}

fn expect_no_args(name: &str, args: &[String]) -> Result<(), String> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(format!("{name} takes no arguments"))
    }
}

fn require_text(name: &str, args: &[String]) -> Result<String, String> {
    if args.is_empty() {
        return Err(format!("{name} requires an argument"));
    }
    Ok(args.join(" "))
}

fn split_name<'a>(name: &str, args: &'a [String]) -> Result<(&'a str, &'a [String]), String> {
    match args.split_first() {
        Some((first, rest)) => Ok((first.as_str(), rest)),
        None => Err(format!("{name} requires an entity name")),
    }
}

fn parse_position(name: &str, args: &[String]) -> Result<[f32; 3], String> {
    let mut position = [0.0f32; 3];
    for (slot, raw) in position.iter_mut().zip(args) {
        *slot = raw
            .parse::<f32>()
            .map_err(|_| format!("invalid {name} coordinate '{raw}' (expected f32)"))?;
    }
    Ok(position)
}

fn parse_optional_position(name: &str, args: &[String]) -> Result<[f32; 3], String> {
    match args.len() {
        0 => Ok([0.0; 3]),
        3 => parse_position(name, args),
        _ => Err(format!("{name} position needs exactly three coordinates")),
    }
}

fn parse_play_object(args: &[String]) -> Result<Value, String> {
    let mut positional = Vec::new();
    let mut draggable = false;
    let mut audio_file = None;
    let mut index = 0usize;
    while index < args.len() {
        match args[index].as_str() {
            "--draggable" => {
                draggable = true;
                index += 1;
            }
            "--audio" => {
                let value = args
                    .get(index + 1)
                    .ok_or_else(|| "missing value for --audio".to_string())?;
                audio_file = Some(value.clone());
                index += 2;
            }
            _ => {
                positional.push(args[index].clone());
                index += 1;
            }
        }
    }

    let (entity_name, rest) = split_name("load-object", &positional)?;
    let position = parse_optional_position("load-object", rest)?;
    let mut props = json!({
        "name": entity_name,
        "tag": "PlayObject",
        "draggable": draggable,
        "initPosition": position,
    });
    if let Some(audio_file) = audio_file {
        props["audioFile"] = Value::String(audio_file);
    }
    Ok(props)
}

fn connect_and_wait_ready<F>(
    port: u16,
    timeout: Duration,
    retry_base: Duration,
    mut on_line: F,
) -> Result<Session, String>
where
    F: FnMut(&ParsedLine),
{
    let deadline = Instant::now() + timeout;
    let mut attempt = 0u32;

    while Instant::now() < deadline {
        if let Ok(writer) = TcpStream::connect(("127.0.0.1", port)) {
            writer
                .set_read_timeout(Some(Duration::from_millis(100)))
                .map_err(|error| format!("failed to set socket read timeout: {error}"))?;
            let reader_stream = writer
                .try_clone()
                .map_err(|error| format!("failed to clone socket stream: {error}"))?;
            let mut session = Session {
                writer,
                reader: BufReader::new(reader_stream),
            };

            match wait_for_line(&mut session.reader, deadline, &mut on_line, is_ready_line) {
                WaitOutcome::Matched => return Ok(session),
                WaitOutcome::Timeout => break,
                WaitOutcome::Disconnected => {}
                WaitOutcome::IoError(error) => {
                    return Err(format!(
                        "socket read error while waiting for check-in: {error}"
                    ));
                }
            }
        }

        let shift = attempt.min(8);
        let backoff_ms = (retry_base.as_millis() as u64)
            .saturating_mul(1u64 << shift)
            .min(MAX_RETRY_BACKOFF_MS);
        let sleep_for = Duration::from_millis(backoff_ms.max(1));
        if Instant::now() + sleep_for >= deadline {
            break;
        }
        thread::sleep(sleep_for);
        attempt = attempt.saturating_add(1);
    }

    Err(format!(
        "timed out waiting for tablet check-in on 127.0.0.1:{port}"
    ))
}

enum WaitOutcome {
    Matched,
    Timeout,
    Disconnected,
    IoError(io::Error),
}

fn wait_for_line<F, P>(
    reader: &mut BufReader<TcpStream>,
    deadline: Instant,
    on_line: &mut F,
    matches: P,
) -> WaitOutcome
where
    F: FnMut(&ParsedLine),
    P: Fn(&ParsedLine) -> bool,
{
    loop {
        match read_one_line(reader, deadline) {
            ReadOutcome::Line(raw) => {
                let parsed = parse_wire_line(&raw);
                if matches(&parsed) {
                    return WaitOutcome::Matched;
                }
                on_line(&parsed);
            }
            ReadOutcome::NoData => {}
            ReadOutcome::Disconnected => return WaitOutcome::Disconnected,
            ReadOutcome::DeadlineExceeded => return WaitOutcome::Timeout,
            ReadOutcome::IoError(error) => return WaitOutcome::IoError(error),
        }
    }
}

fn wait_for_ack<F>(
    reader: &mut BufReader<TcpStream>,
    timeout: Duration,
    mut on_line: F,
) -> Result<(), String>
where
    F: FnMut(&ParsedLine),
{
    let deadline = Instant::now() + timeout;
    match wait_for_line(reader, deadline, &mut on_line, is_ack_line) {
        WaitOutcome::Matched => Ok(()),
        WaitOutcome::Timeout => Err("timed out waiting for tablet acknowledgement".to_string()),
        WaitOutcome::Disconnected => {
            Err("socket disconnected while waiting for acknowledgement".to_string())
        }
        WaitOutcome::IoError(error) => Err(format!(
            "socket read error while waiting for acknowledgement: {error}"
        )),
    }
}

fn read_until_quiet<F>(
    reader: &mut BufReader<TcpStream>,
    timeout: Duration,
    quiet_window: Duration,
    mut on_line: F,
) -> Result<(), String>
where
    F: FnMut(&ParsedLine),
{
    let deadline = Instant::now() + timeout;
    let mut last_line_at = Instant::now();

    loop {
        match read_one_line(reader, deadline) {
            ReadOutcome::Line(raw) => {
                on_line(&parse_wire_line(&raw));
                last_line_at = Instant::now();
            }
            ReadOutcome::NoData => {
                if Instant::now().saturating_duration_since(last_line_at) >= quiet_window {
                    return Ok(());
                }
            }
            ReadOutcome::Disconnected => {
                return Err("socket disconnected while waiting for command output".to_string())
            }
            ReadOutcome::DeadlineExceeded => return Ok(()),
            ReadOutcome::IoError(error) => {
                return Err(format!(
                    "socket read error while waiting for command output: {error}"
                ))
            }
        }
    }
}

fn emit_line<W: Write>(stdout: &mut W, line: &ParsedLine, include_telemetry: bool) {
    if should_print_line(line, include_telemetry) {
        let _ = writeln!(stdout, "{}", line.payload);
    }
}

fn send_line(writer: &mut TcpStream, line: &str) -> Result<(), String> {
    writer
        .write_all(line.as_bytes())
        .map_err(|error| format!("failed to send command: {error}"))?;
    writer
        .write_all(b"\n")
        .map_err(|error| format!("failed to terminate command line: {error}"))?;
    writer
        .flush()
        .map_err(|error| format!("failed to flush command line: {error}"))
}

enum ReadOutcome {
    Line(String),
    NoData,
    Disconnected,
    DeadlineExceeded,
    IoError(io::Error),
}

fn read_one_line(reader: &mut BufReader<TcpStream>, deadline: Instant) -> ReadOutcome {
    if Instant::now() >= deadline {
        return ReadOutcome::DeadlineExceeded;
    }

    let mut line = String::new();
    match reader.read_line(&mut line) {
        Ok(0) => ReadOutcome::Disconnected,
        Ok(_) => ReadOutcome::Line(line),
        Err(error)
            if error.kind() == io::ErrorKind::WouldBlock
                || error.kind() == io::ErrorKind::TimedOut =>
        {
            ReadOutcome::NoData
        }
        Err(error) => ReadOutcome::IoError(error),
    }
}
