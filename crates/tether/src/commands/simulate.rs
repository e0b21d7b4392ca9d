//! `tether simulate`: run a supervisor against simulated flaky links.
//!
//! A discovery task answers every `ConnectionLost` with a fresh link after
//! a short delay, while N shell commands run concurrently through one
//! `PersistentDevice`. The report shows per-command attempts and the link
//! accounting (each link must be released exactly once).

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use serde::Serialize;
use tabled::Tabled;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tether_core::{CommandResult, CoreError, DeviceEvent, PersistentDevice, TransportKind};

use crate::cli::{GlobalOpts, SimulateArgs, TransportArg};
use crate::error::CliError;
use crate::output::{self, Tone};
use crate::sim::{SimulatedTransport, TransportReport};

// ── Report types ────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct SimulationReport {
    device_id: String,
    method: String,
    latest_connection_id: String,
    reconnects: usize,
    elapsed_ms: u64,
    commands: Vec<CommandRow>,
    connections: TransportReport,
}

#[derive(Debug, Clone, Serialize, Tabled)]
struct CommandRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Command")]
    command: String,
    #[tabled(rename = "Attempts")]
    attempts: u32,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Output")]
    output: String,
}

impl CommandRow {
    fn new(index: usize, result: &CommandResult, outcome: &Result<String, CoreError>) -> Self {
        let (status, output) = match outcome {
            Ok(text) => ("ok", text.clone()),
            Err(CoreError::Cancelled) => ("cancelled", result.output()),
            Err(err) => ("failed", err.to_string()),
        };
        Self {
            index,
            command: result.command_text().to_owned(),
            attempts: result.attempts(),
            status: status.to_owned(),
            output,
        }
    }

    fn tone(&self) -> Tone {
        match self.status.as_str() {
            "ok" => Tone::Good,
            "cancelled" => Tone::Warn,
            _ => Tone::Bad,
        }
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(args: SimulateArgs, global: &GlobalOpts) -> Result<(), CliError> {
    if args.commands == 0 {
        return Err(CliError::Validation {
            field: "commands".into(),
            reason: "must be at least 1".into(),
        });
    }

    let config = super::load_config(global)?;
    let mut supervisor = config.supervisor_config(Some(args.device.as_str()))?;
    if let Some(concurrency) = args.concurrency {
        if concurrency == 0 {
            return Err(CliError::Validation {
                field: "concurrency".into(),
                reason: "must be greater than 0".into(),
            });
        }
        supervisor.concurrency = concurrency;
    }
    let settle_deadline = supervisor.release_timeout + Duration::from_secs(1);

    let kind = match args.transport {
        TransportArg::DebugBridge => TransportKind::DebugBridge,
        TransportArg::RemoteShell => TransportKind::RemoteShell,
    };
    let transport = Arc::new(SimulatedTransport::new(
        kind,
        args.fail_after,
        Duration::from_millis(args.op_delay_ms),
    ));
    let device = PersistentDevice::new(args.device.clone(), transport.connect(), supervisor);

    let stop = CancellationToken::new();
    let discovery = tokio::spawn(discover(
        device.clone(),
        device.subscribe(),
        Arc::clone(&transport),
        Duration::from_millis(args.reconnect_delay_ms),
        stop.clone(),
    ));

    if let Some(after) = args.cancel_after_ms {
        let token = CancellationToken::new();
        device.set_cancellation_token(Some(token.clone()));
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(after)).await;
            info!("cancelling outstanding commands");
            token.cancel();
        });
    }

    let started = Instant::now();
    let results: Vec<CommandResult> = (0..args.commands)
        .map(|i| device.execute_shell_command(format!("getprop sim.prop.{i}")))
        .collect();
    let outcomes = join_all(results.iter().map(|r| r.wait())).await;
    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    let method = device.current_connection_method();
    let latest_connection_id = device.latest_connection_id();
    stop.cancel();
    let reconnects = discovery
        .await
        .map_err(|e| CliError::Internal(format!("discovery task failed: {e}")))?;
    device.dispose().await;
    let connections = transport.settle(settle_deadline).await;

    let commands = results
        .iter()
        .zip(&outcomes)
        .enumerate()
        .map(|(i, (result, outcome))| CommandRow::new(i + 1, result, outcome))
        .collect();
    let report = SimulationReport {
        device_id: args.device,
        method,
        latest_connection_id,
        reconnects,
        elapsed_ms,
        commands,
        connections,
    };

    let color = output::should_color(&global.color);
    let rendered = output::render_single(
        &global.output,
        &report,
        |r| render_detail(r, color),
        render_plain,
    )?;
    output::print_output(&rendered, global.quiet);

    if connections.is_balanced() {
        Ok(())
    } else {
        Err(CliError::ReleaseMismatch {
            leaked: connections.leaked,
            duplicated: connections.double_released,
        })
    }
}

// ── Discovery ───────────────────────────────────────────────────────

/// Stand-in for a device scanner: supplies a new link after each loss.
/// Subscribed before spawning so no loss goes unanswered. Returns the
/// number of replacement links provided.
async fn discover(
    device: PersistentDevice,
    mut events: broadcast::Receiver<DeviceEvent>,
    transport: Arc<SimulatedTransport>,
    delay: Duration,
    stop: CancellationToken,
) -> usize {
    let mut reconnects = 0;

    loop {
        let event = tokio::select! {
            () = stop.cancelled() => break,
            event = events.recv() => event,
        };

        match event {
            Ok(DeviceEvent::ConnectionLost {
                connection, error, ..
            }) => {
                info!(
                    device_id = %device.device_id(),
                    connection_id = %connection.connection_id(),
                    error = %error,
                    "link lost, rediscovering"
                );
                tokio::select! {
                    () = stop.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
                match device.provide_connection(transport.connect()).await {
                    Ok(()) => reconnects += 1,
                    Err(e) => {
                        warn!(error = %e, "could not provide replacement link");
                        break;
                    }
                }
            }
            Ok(DeviceEvent::ConnectionEstablished { .. }) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "discovery fell behind device events");
            }
            Err(RecvError::Closed) => break,
        }
    }

    reconnects
}

// ── Rendering ───────────────────────────────────────────────────────

fn render_detail(report: &SimulationReport, color: bool) -> String {
    let rows: Vec<CommandRow> = report
        .commands
        .iter()
        .map(|row| CommandRow {
            status: output::paint(&row.status, row.tone(), color),
            output: row.output.replace('\n', " | "),
            ..row.clone()
        })
        .collect();

    let c = &report.connections;
    let links = format!(
        "created {}, released {}, leaked {}, double-released {}",
        c.created, c.released, c.leaked, c.double_released
    );
    let links_tone = if c.is_balanced() { Tone::Good } else { Tone::Bad };

    let mut out = output::render_table(&rows);
    let _ = writeln!(out);
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Device      {} ({}, last link {})",
        report.device_id, report.method, report.latest_connection_id
    );
    let _ = writeln!(out, "Reconnects  {}", report.reconnects);
    let _ = writeln!(out, "Links       {}", output::paint(&links, links_tone, color));
    let _ = writeln!(out, "Peak        {} concurrent operations", c.peak_concurrency);
    let _ = write!(out, "Elapsed     {} ms", report.elapsed_ms);
    out
}

fn render_plain(report: &SimulationReport) -> String {
    report
        .commands
        .iter()
        .map(|row| format!("{}\t{}\t{}", row.index, row.status, row.attempts))
        .collect::<Vec<_>>()
        .join("\n")
}
