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

//! Cooperative shutdown.
//!
//! A watch-channel token set once by a platform signal listener and checked
//! by every loop at iteration boundaries. Nothing is interrupted mid-item.

use tokio::sync::watch;
use tracing::info;

/// Sets the token. Held by the signal listener, or by tests driving a loop
/// directly.
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Checked by worker, supervisor, and stats loops.
#[derive(Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

impl ShutdownToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the token is set. Also resolves if the handle is
    /// dropped without cancelling, so loops never hang on a dead listener.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
    }
}

pub fn shutdown_pair() -> (ShutdownHandle, ShutdownToken) {
    let (tx, rx) = watch::channel(false);
    (ShutdownHandle { tx }, ShutdownToken { rx })
}

/// Install SIGINT/SIGTERM listeners and return the token they set.
pub fn listen_for_signals() -> std::io::Result<ShutdownToken> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate())?;
    let mut int = signal(SignalKind::interrupt())?;
    let (handle, token) = shutdown_pair();

    tokio::spawn(async move {
        tokio::select! {
            _ = term.recv() => {}
            _ = int.recv() => {}
        }
        info!("termination signal received");
        handle.cancel();
    });

    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_sets_token() {
        let (handle, token) = shutdown_pair();
        assert!(!token.is_cancelled());
        handle.cancel();
        assert!(token.is_cancelled());
        token.cancelled().await;
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiters() {
        let (handle, token) = shutdown_pair();
        let waiter = tokio::spawn(async move {
            token.cancelled().await;
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.cancel();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_dropped_handle_unblocks_waiters() {
        let (handle, token) = shutdown_pair();
        drop(handle);
        tokio::time::timeout(Duration::from_secs(1), token.cancelled())
            .await
            .unwrap();
    }
}
