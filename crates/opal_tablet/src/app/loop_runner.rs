use std::io::{self, BufRead};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use opal_core::{
    shutdown_link, CommandInbox, CommandQueue, QueueHandle, RemoteLink, SceneController,
    SubscriptionId,
};
use tracing::{error, info, warn};

use super::bootstrap::{LoopConfig, StartupError, TabletConfig};
use super::headless::{HeadlessGestures, HeadlessPresentation, SimulatedTouch};
use super::remote_link::TcpRemoteLink;

pub(crate) fn run(config: TabletConfig) -> ExitCode {
    if let Err(err) = run_tablet(config) {
        error!(error = %err, "startup_failed");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn run_tablet(config: TabletConfig) -> Result<(), StartupError> {
    let mut link = TcpRemoteLink::bind_localhost(config.bind_port, config.link_diag)?;
    let mut wiring = wire_controller(&config, &mut link);
    wiring.controller.load_default_scene();

    let stop = Arc::new(AtomicBool::new(false));
    spawn_console(
        Arc::clone(&stop),
        wiring.controller.queue_handle(),
        wiring.touches,
    )?;
    info!(port = link.bound_port(), "tablet_ready");

    let ticks = run_fixed_loop(&mut wiring.controller, &config.loop_config, &stop);

    shutdown_link(&mut link, wiring.subscription);
    let drained = wiring.controller.drain_and_run_all();
    info!(ticks, drained, "tablet_shutdown_complete");
    Ok(())
}

struct ControllerWiring {
    controller: SceneController,
    subscription: SubscriptionId,
    touches: Sender<SimulatedTouch>,
}

fn wire_controller(config: &TabletConfig, link: &mut TcpRemoteLink) -> ControllerWiring {
    let (gestures, touches) = HeadlessGestures::new();
    let controller = SceneController::new(
        CommandQueue::new(config.queue),
        Box::new(HeadlessPresentation::new(&config.asset_root)),
        Some(Box::new(gestures)),
        Box::new(link.sink()),
        config.loop_config.controller.clone(),
    );
    let subscription = link.subscribe(Arc::new(CommandInbox::new(controller.queue_handle())));
    ControllerWiring {
        controller,
        subscription,
        touches,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ConsoleCommand {
    Quit,
    Touch(SimulatedTouch),
    Snapshot,
    Help,
    Unknown(String),
}

fn parse_console_line(line: &str) -> Option<ConsoleCommand> {
    let mut parts = line.trim().splitn(2, char::is_whitespace);
    let verb = parts.next().filter(|verb| !verb.is_empty())?;
    let argument = parts.next().map(str::trim).filter(|rest| !rest.is_empty());
    let command = match (verb, argument) {
        ("quit" | "exit", None) => ConsoleCommand::Quit,
        ("tap", Some(name)) => ConsoleCommand::Touch(SimulatedTouch::Tap(name.to_string())),
        ("drag", Some(name)) => ConsoleCommand::Touch(SimulatedTouch::Drag(name.to_string())),
        ("snapshot", None) => ConsoleCommand::Snapshot,
        ("help", None) => ConsoleCommand::Help,
        _ => ConsoleCommand::Unknown(line.trim().to_string()),
    };
    Some(command)
}

/// Operator console on stdin. End of input counts as `quit`.
fn spawn_console(
    stop: Arc<AtomicBool>,
    queue: QueueHandle,
    touches: Sender<SimulatedTouch>,
) -> Result<(), StartupError> {
    thread::Builder::new()
        .name("opal-console".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(err) => {
                        warn!(error = %err, "console_read_failed");
                        break;
                    }
                };
                match parse_console_line(&line) {
                    None => {}
                    Some(ConsoleCommand::Quit) => break,
                    Some(ConsoleCommand::Touch(touch)) => {
                        if touches.send(touch).is_err() {
                            break;
                        }
                    }
                    Some(ConsoleCommand::Snapshot) => {
                        queue.enqueue(|controller| controller.publish_scene_snapshot());
                    }
                    Some(ConsoleCommand::Help) => {
                        info!("console commands: tap <name>, drag <name>, snapshot, quit");
                    }
                    Some(ConsoleCommand::Unknown(raw)) => {
                        warn!(line = %raw, "console_unknown_command");
                    }
                }
            }
            info!("console_closed_shutting_down");
            stop.store(true, Ordering::Release);
        })
        .map(|_| ())
        .map_err(|source| StartupError::SpawnThread {
            name: "opal-console",
            source,
        })
}

fn run_fixed_loop(controller: &mut SceneController, config: &LoopConfig, stop: &AtomicBool) -> u64 {
    let fixed_dt = Duration::from_secs_f64(1.0 / config.target_tps.max(1) as f64);
    let mut metrics = TickMetrics::new(config.metrics_log_interval);
    let mut accumulator = Duration::ZERO;
    let mut last_instant = Instant::now();
    let mut total_ticks = 0u64;

    while !stop.load(Ordering::Acquire) {
        let now = Instant::now();
        let frame_dt = clamp_frame_delta(
            now.saturating_duration_since(last_instant),
            config.max_frame_delta,
        );
        last_instant = now;

        let plan = plan_ticks(
            accumulator.saturating_add(frame_dt),
            fixed_dt,
            config.max_ticks_per_frame,
        );
        accumulator = plan.remaining_accumulator;
        if plan.dropped_backlog > Duration::ZERO {
            warn!(
                dropped_ms = plan.dropped_backlog.as_secs_f32() * 1000.0,
                "tick_backlog_dropped"
            );
        }

        for _ in 0..plan.ticks_to_run {
            let applied = controller.tick();
            metrics.record_tick(applied);
            total_ticks = total_ticks.saturating_add(1);
        }

        if let Some(snapshot) = metrics.maybe_snapshot(Instant::now()) {
            info!(
                tps = snapshot.tps,
                commands = snapshot.commands_applied,
                pending = controller.pending_commands(),
                "loop_metrics"
            );
        }

        thread::sleep(fixed_dt.saturating_sub(accumulator));
    }
    total_ticks
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TickPlan {
    ticks_to_run: u32,
    remaining_accumulator: Duration,
    dropped_backlog: Duration,
}

fn plan_ticks(mut accumulator: Duration, fixed_dt: Duration, max_ticks_per_frame: u32) -> TickPlan {
    let mut ticks_to_run = 0u32;
    while accumulator >= fixed_dt && ticks_to_run < max_ticks_per_frame {
        accumulator = accumulator.saturating_sub(fixed_dt);
        ticks_to_run = ticks_to_run.saturating_add(1);
    }

    let dropped_backlog = if accumulator >= fixed_dt {
        std::mem::take(&mut accumulator)
    } else {
        Duration::ZERO
    };
    TickPlan {
        ticks_to_run,
        remaining_accumulator: accumulator,
        dropped_backlog,
    }
}

fn clamp_frame_delta(frame_dt: Duration, max_frame_delta: Duration) -> Duration {
    frame_dt.min(max_frame_delta)
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct TickMetricsSnapshot {
    tps: f32,
    commands_applied: u64,
}

#[derive(Debug)]
struct TickMetrics {
    interval_start: Instant,
    interval: Duration,
    ticks: u32,
    commands_applied: u64,
}

impl TickMetrics {
    fn new(interval: Duration) -> Self {
        Self {
            interval_start: Instant::now(),
            interval,
            ticks: 0,
            commands_applied: 0,
        }
    }

    fn record_tick(&mut self, commands_applied: usize) {
        self.ticks = self.ticks.saturating_add(1);
        self.commands_applied = self
            .commands_applied
            .saturating_add(commands_applied as u64);
    }

    fn maybe_snapshot(&mut self, now: Instant) -> Option<TickMetricsSnapshot> {
        let elapsed = now.saturating_duration_since(self.interval_start);
        if elapsed < self.interval {
            return None;
        }

        let snapshot = TickMetricsSnapshot {
            tps: self.ticks as f32 / elapsed.as_secs_f32().max(f32::EPSILON),
            commands_applied: self.commands_applied,
        };
        self.interval_start = now;
        self.ticks = 0;
        self.commands_applied = 0;
        Some(snapshot)
    }
}
