use std::env;
use std::io;
use std::process::ExitCode;
use std::str::FromStr;

use opal_cli::{helper_record, run, validate_record, CommandKind, CommonOptions};

fn main() -> ExitCode {
    match run_cli() {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{message}");
            ExitCode::from(1)
        }
    }
}

fn run_cli() -> Result<(), String> {
    let args = env::args().skip(1).collect::<Vec<_>>();
    match args.first().map(String::as_str) {
        None => return Err(usage_text()),
        Some("-h" | "--help") => {
            print_usage();
            return Ok(());
        }
        Some(_) => {}
    }

    let (options, index) = parse_leading_options(&args)?;
    let command = args
        .get(index)
        .ok_or_else(|| "missing subcommand".to_string())?
        .as_str();
    let command_args = &args[(index + 1)..];

    let kind = match command {
        "wait-ready" => {
            if !command_args.is_empty() {
                return Err("wait-ready takes no arguments".to_string());
            }
            CommandKind::WaitReady
        }
        "send" => {
            if command_args.is_empty() {
                return Err("send requires a json command record".to_string());
            }
            CommandKind::Send {
                record: validate_record(&command_args.join(" "))?,
            }
        }
        "script" => match command_args {
            [path] => CommandKind::Script { path: path.clone() },
            [] => return Err("script requires a file path".to_string()),
            _ => return Err("script takes exactly one file path".to_string()),
        },
        helper => CommandKind::Send {
            record: helper_record(helper, command_args)?,
        },
    };

    run(kind, options, &mut io::stdout())
}

/// Consumes `--flag [value]` pairs up to the first subcommand word.
fn parse_leading_options(args: &[String]) -> Result<(CommonOptions, usize), String> {
    let mut options = CommonOptions::default();
    let mut index = 0usize;
    while let Some(flag) = args.get(index) {
        let value = args.get(index + 1).map(String::as_str);
        let consumed = match flag.as_str() {
            "--port" => {
                options.port = flag_value(flag, value, "a port number")?;
                2
            }
            "--timeout-ms" => {
                options.timeout_ms = flag_value(flag, value, "milliseconds")?;
                2
            }
            "--retry-ms" => {
                options.retry_ms = flag_value(flag, value, "milliseconds")?;
                2
            }
            "--include-telemetry" => {
                options.include_telemetry = true;
                1
            }
            _ => break,
        };
        index += consumed;
    }
    Ok((options, index))
}

fn flag_value<T: FromStr>(flag: &str, value: Option<&str>, expected: &str) -> Result<T, String> {
    let value = value.ok_or_else(|| format!("{flag} needs a value ({expected})"))?;
    value
        .parse::<T>()
        .map_err(|_| format!("{flag}: '{value}' is not {expected}"))
}

fn print_usage() {
    println!("{}", usage_text());
}

fn usage_text() -> String {
    [
        "opal_cli - remote controller for the opal tablet",
        "",
        "Usage:",
        "  opal_cli [options] wait-ready",
        "  opal_cli [options] send <json record>",
        "  opal_cli [options] script <file>",
        "  opal_cli [options] reset | clear | keyframe | goal",
        "  opal_cli [options] touch on|off",
        "  opal_cli [options] do <action> | say <speech...>",
        "  opal_cli [options] load-background <name> [x y z]",
        "  opal_cli [options] load-object <name> [x y z] [--draggable] [--audio <file>]",
        "  opal_cli [options] move <name> <x> <y> <z>",
        "  opal_cli [options] highlight <name>",
        "",
        "Options:",
        "  --port <u16>          tablet port (default 9090)",
        "  --timeout-ms <u64>    overall wait per step (default 5000)",
        "  --retry-ms <u64>      initial connect backoff (default 100)",
        "  --include-telemetry   also print action, scene and metrics messages",
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|arg| arg.to_string()).collect()
    }

    #[test]
    fn leading_options_stop_at_subcommand() {
        let raw = args(&["--port", "9191", "--include-telemetry", "send", "--port"]);
        let (options, index) = parse_leading_options(&raw).expect("options");
        assert_eq!(options.port, 9191);
        assert!(options.include_telemetry);
        assert_eq!(raw[index], "send");
    }

    #[test]
    fn bad_option_values_are_reported() {
        let missing = parse_leading_options(&args(&["--timeout-ms"])).expect_err("missing");
        assert!(missing.contains("--timeout-ms"), "{missing}");
        let garbage = parse_leading_options(&args(&["--port", "70000"])).expect_err("garbage");
        assert!(garbage.contains("70000"), "{garbage}");
    }
}
