// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The per-instance supervisor.
//!
//! One runner task owns the child process end to end: FIFO setup,
//! spawn, line scanning, command handling, reap, replay upload and
//! archival. Event handlers run serially on this task; the pid watcher
//! and the two scanners are the only helpers.

use crate::events::{process_line, EventCtx};
use crate::fifo::{self, ParentPipes};
use crate::gamesubmit;
use crate::proc;
use crate::world::World;
use ah_core::instance::{Instance, InstanceCommand, InstanceState};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::unix::pipe;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Depth of the scanner → supervisor line channel; a bursting child
/// blocks its scanners once handlers fall this far behind.
const LINE_QUEUE_DEPTH: usize = 64;

const PID_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Spawn the runner task for an instance and register it for shutdown
/// tracking.
pub fn launch(world: &Arc<World>, inst: &Arc<Instance>) {
    let handle = tokio::spawn(run(Arc::clone(world), Arc::clone(inst)));
    world.registry.track(inst.id, handle);
}

/// The fixed, order-sensitive child argv.
pub fn build_argv(inst: &Instance) -> Vec<String> {
    let spec = inst.spec();
    let settings = &spec.settings;
    vec![
        spec.bin_path.clone(),
        format!("--configdir={}", spec.conf_dir.display()),
        "--nosound".to_string(),
        "--autohost=preset.json".to_string(),
        "--headless".to_string(),
        format!("--gameport={}", settings.game_port),
        "--enablelobbyslashcmd".to_string(),
        format!("--startplayers={}", settings.player_count),
        "--gamelog-output=log,cmdinterface".to_string(),
        "--gamelog-outputkey=playerposition".to_string(),
        "--gamelog-frameinterval=1".to_string(),
        format!("--gametimelimit={}", settings.time_limit),
        "--host-chat-config=quickchat".to_string(),
        "--async-join-approve".to_string(),
        "--enablecmdinterface=stdin".to_string(),
        "--host-chat-config=quickchat".to_string(),
    ]
}

/// Broadcasts may only carry plain words: anything outside
/// `[a-zA-Z0-9 ]` is stripped before reaching the child.
pub fn sanitize_broadcast(message: &str) -> String {
    message
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == ' ')
        .collect()
}

async fn run(world: Arc<World>, inst: Arc<Instance>) {
    let conf_dir = inst.spec().conf_dir.clone();
    let (pipes, child) = match setup(&world, &inst, &conf_dir) {
        Ok(ready) => ready,
        Err(e) => {
            tracing::error!(instance = inst.id, error = %e, "runner setup failed");
            inst.set_state(InstanceState::Exited);
            if inst.recovered {
                world.registry.release(inst.id);
            } else {
                archive(&world, &inst, &conf_dir).await;
            }
            return;
        }
    };

    let Some(mut cmd_rx) = inst.take_command_rx() else {
        tracing::error!(instance = inst.id, "command receiver already taken");
        inst.set_state(InstanceState::Exited);
        return;
    };

    let stop = CancellationToken::new();
    let dead = CancellationToken::new();
    let (line_tx, mut line_rx) = mpsc::channel::<String>(LINE_QUEUE_DEPTH);
    let scanners = [
        spawn_scanner("stdout", inst.id, pipes.stdout, line_tx.clone(), stop.clone()),
        spawn_scanner("stderr", inst.id, pipes.stderr, line_tx.clone(), stop.clone()),
    ];
    drop(line_tx);
    let pid = inst.pid.load(Ordering::SeqCst);
    let watcher = spawn_pid_watcher(inst.id, pid, stop.clone(), dead.clone());

    let mut ctx = EventCtx::new(Arc::clone(&world), Arc::clone(&inst), pipes.stdin);
    let mut detached = false;
    let mut lines_closed = false;
    loop {
        tokio::select! {
            _ = dead.cancelled() => {
                tracing::info!(instance = inst.id, pid, "child process is gone");
                break;
            }
            cmd = cmd_rx.recv() => match cmd {
                Some(InstanceCommand::Shutdown) => {
                    tracing::info!(instance = inst.id, "asking child to shut down");
                    ctx.write_line("shutdown now").await;
                    inst.set_state(InstanceState::Exiting);
                    save_snapshot(&world, &inst);
                }
                Some(InstanceCommand::Broadcast(message)) => {
                    let clean = sanitize_broadcast(&message);
                    ctx.write_line(&format!("chat bcast {clean}")).await;
                }
                Some(InstanceCommand::RunnerStop) => {
                    tracing::info!(instance = inst.id, "detaching runner, child keeps running");
                    inst.set_state(InstanceState::Exiting);
                    detached = true;
                    break;
                }
                None => {
                    tracing::warn!(instance = inst.id, "command channel closed");
                    break;
                }
            },
            line = line_rx.recv(), if !lines_closed => {
                match line {
                    Some(line) => {
                        if process_line(&mut ctx, &line).await && !line.trim().is_empty() {
                            tracing::debug!(instance = inst.id, line, "unhandled hoster message");
                        }
                    }
                    // Both scanners are gone; the pid watcher decides
                    // what happens next.
                    None => lines_closed = true,
                }
            }
        }
    }

    stop.cancel();
    // Every stdin write was awaited on this task, so no write is in
    // flight when the pipe handles close on drop.
    drop(ctx);
    for handle in scanners {
        let _ = handle.await;
    }
    let _ = watcher.await;

    // Only the process that forked the child may reap it.
    if let Some(mut child) = child {
        if !inst.recovered {
            let _ = child.try_wait();
        }
    }

    if !detached {
        if inst.game_id.load(Ordering::SeqCst) > 0 {
            gamesubmit::upload_replay(&world, &inst).await;
        }
        archive(&world, &inst, &conf_dir).await;
    }
    inst.set_state(InstanceState::Exited);
    tracing::info!(instance = inst.id, detached, "runner finished");
}

/// Prepare pipes and (for fresh instances) fork the child. Recovered
/// instances re-open the surviving FIFOs instead.
fn setup(
    world: &Arc<World>,
    inst: &Arc<Instance>,
    conf_dir: &Path,
) -> std::io::Result<(ParentPipes, Option<Child>)> {
    if inst.recovered {
        let pipes = fifo::open_parent(conf_dir)?;
        tracing::info!(instance = inst.id, "re-attached to surviving child");
        return Ok((pipes, None));
    }

    fifo::create_fifos(conf_dir, world.settings.file_perms())?;
    let (child_in, child_out, child_err) = fifo::child_stdio(conf_dir)?;

    let argv = build_argv(inst);
    let mut command = Command::new(&argv[0]);
    command
        .args(&argv[1..])
        .stdin(Stdio::from(child_in))
        .stdout(Stdio::from(child_out))
        .stderr(Stdio::from(child_err))
        .process_group(0);
    let child = command.spawn()?;
    let pid = child.id() as i64;
    inst.pid.store(pid, Ordering::SeqCst);
    tracing::info!(instance = inst.id, pid, "spawned hoster process");

    // pid and cmdline are written exactly once, right after the fork;
    // recovery validates re-attachment against them.
    std::fs::write(conf_dir.join("pid"), pid.to_string())?;
    let mut cmdline = Vec::new();
    for arg in &argv {
        cmdline.extend_from_slice(arg.as_bytes());
        cmdline.push(0);
    }
    std::fs::write(conf_dir.join("cmdline"), cmdline)?;

    inst.set_state(InstanceState::Starting);
    save_snapshot(world, inst);

    // Re-open our ends now that the child holds its own; this keeps
    // per-direction EOF behavior stable for the scanners.
    let pipes = fifo::open_parent(conf_dir)?;
    Ok((pipes, Some(child)))
}

fn save_snapshot(world: &Arc<World>, inst: &Instance) {
    if let Err(e) = ah_storage::save(inst) {
        tracing::warn!(instance = inst.id, error = %e, "failed to save instance snapshot");
        world.errors.post(format!(
            "Failed to save instance recovery json: {e} (instance {})",
            inst.id
        ));
    }
}

async fn archive(world: &Arc<World>, inst: &Instance, conf_dir: &Path) {
    let world = Arc::clone(world);
    let conf_dir = conf_dir.to_path_buf();
    let instance_id = inst.id;
    let result =
        tokio::task::spawn_blocking(move || world.archiver.archive_instance(&conf_dir)).await;
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::error!(instance = instance_id, error = %e, "failed to archive instance")
        }
        Err(e) => {
            tracing::error!(instance = instance_id, error = %e, "archive task failed")
        }
    }
}

fn spawn_scanner(
    stream: &'static str,
    instance_id: i64,
    source: pipe::Receiver,
    lines: mpsc::Sender<String>,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut reader = BufReader::new(source).lines();
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                line = reader.next_line() => match line {
                    Ok(Some(line)) => {
                        if lines.send(line).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        tracing::debug!(instance = instance_id, stream, "pipe reached EOF");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(instance = instance_id, stream, error = %e, "pipe read failed");
                        break;
                    }
                }
            }
        }
    })
}

fn spawn_pid_watcher(
    instance_id: i64,
    pid: i64,
    stop: CancellationToken,
    dead: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PID_POLL_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = stop.cancelled() => return,
                _ = ticker.tick() => {
                    if !proc::is_pid_alive(pid) {
                        tracing::info!(instance = instance_id, pid, "pid watcher: process dead");
                        dead.cancel();
                        return;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
