// Copyright 2025 Rateflow Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Worker process supervision.
//!
//! The supervisor spawns one worker process per queue shard by re-invoking
//! this executable with the worker role, captures each child's output, and
//! restarts any child that exits unexpectedly with the same shard identity.
//! On a termination signal it stops respawning, signals every live child,
//! and waits for them to exit.

use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{error, info};

use rateflow_core::{PersistConfig, RateflowError, Result};

use crate::shutdown::ShutdownToken;

/// Identity of one worker slot: which queue, and which shard when the
/// queue runs more than one worker.
#[derive(Debug, Clone)]
struct ChildSlot {
    qname: String,
    shard: Option<usize>,
}

struct ChildExit {
    slot: ChildSlot,
    pid: u32,
    status: Option<ExitStatus>,
    output: String,
}

/// Command-line arguments for one worker child.
pub fn worker_args(config_path: &Path, qname: &str, shard: Option<usize>) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "--role".into(),
        "worker".into(),
        "--config".into(),
        config_path.as_os_str().to_os_string(),
        "--queue".into(),
        qname.into(),
    ];
    if let Some(shard) = shard {
        args.push("--shard".into());
        args.push(shard.to_string().into());
    }
    args
}

pub struct Supervisor {
    config: Arc<PersistConfig>,
    config_path: PathBuf,
    shutdown: ShutdownToken,
    exit_tx: mpsc::Sender<ChildExit>,
    exit_rx: mpsc::Receiver<ChildExit>,
    live_pids: HashSet<u32>,
}

impl Supervisor {
    pub fn new(config: Arc<PersistConfig>, config_path: PathBuf, shutdown: ShutdownToken) -> Self {
        let (exit_tx, exit_rx) = mpsc::channel(64);
        Self {
            config,
            config_path,
            shutdown,
            exit_tx,
            exit_rx,
            live_pids: HashSet::new(),
        }
    }

    fn start_child(&mut self, slot: ChildSlot) -> Result<()> {
        let exe = std::env::current_exe()?;
        let mut cmd = Command::new(exe);
        cmd.args(worker_args(&self.config_path, &slot.qname, slot.shard))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let child = cmd.spawn()?;
        let pid = child.id().ok_or_else(|| {
            RateflowError::Config("spawned worker exited before it got a pid".to_string())
        })?;

        info!(queue = %slot.qname, shard = ?slot.shard, pid, "started worker");
        self.live_pids.insert(pid);

        let exit_tx = self.exit_tx.clone();
        tokio::spawn(async move {
            let exit = match child.wait_with_output().await {
                Ok(out) => {
                    let mut output = String::from_utf8_lossy(&out.stdout).into_owned();
                    output.push_str(&String::from_utf8_lossy(&out.stderr));
                    ChildExit {
                        slot,
                        pid,
                        status: Some(out.status),
                        output,
                    }
                }
                Err(e) => ChildExit {
                    slot,
                    pid,
                    status: None,
                    output: format!("wait failed: {e}"),
                },
            };
            let _ = exit_tx.send(exit).await;
        });

        Ok(())
    }

    pub fn start_all_children(&mut self) -> Result<()> {
        let slots: Vec<ChildSlot> = self
            .config
            .queues
            .iter()
            .flat_map(|(qname, queue_config)| {
                if queue_config.workers > 1 {
                    (1..=queue_config.workers)
                        .map(|i| ChildSlot {
                            qname: qname.clone(),
                            shard: Some(i),
                        })
                        .collect::<Vec<_>>()
                } else {
                    vec![ChildSlot {
                        qname: qname.clone(),
                        shard: None,
                    }]
                }
            })
            .collect();

        for slot in slots {
            self.start_child(slot)?;
        }
        Ok(())
    }

    pub async fn run(&mut self) -> Result<()> {
        info!("starting");
        self.start_all_children()?;

        let shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(exit) = self.exit_rx.recv() => {
                    self.live_pids.remove(&exit.pid);
                    error!(
                        pid = exit.pid,
                        queue = %exit.slot.qname,
                        shard = ?exit.slot.shard,
                        status = ?exit.status,
                        "child died"
                    );
                    for line in exit.output.lines() {
                        error!(pid = exit.pid, "{}", line);
                    }
                    self.start_child(exit.slot)?;
                }
            }
        }

        self.stop_children().await;
        info!("exiting");
        Ok(())
    }

    /// Signal every live child and wait for each to exit.
    async fn stop_children(&mut self) {
        #[cfg(unix)]
        for pid in &self.live_pids {
            info!(pid, "stopping worker");
            let _ = nix::sys::signal::kill(
                nix::unistd::Pid::from_raw(*pid as i32),
                nix::sys::signal::Signal::SIGTERM,
            );
        }

        while !self.live_pids.is_empty() {
            match self.exit_rx.recv().await {
                Some(exit) => {
                    self.live_pids.remove(&exit.pid);
                    info!(pid = exit.pid, queue = %exit.slot.qname, "worker exited");
                }
                None => break,
            }
        }
    }
}
