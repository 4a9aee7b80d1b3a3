use std::process::ExitCode;

mod bootstrap;
mod headless;
mod loop_runner;
mod remote_link;

pub(crate) fn run() -> ExitCode {
    let config = bootstrap::build_config();
    loop_runner::run(config)
}
