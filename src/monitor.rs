//! Background snapshot publisher.
//!
//! The monitor thread takes a [`SystemSnapshot`] at a fixed interval and
//! publishes it over a bounded channel. The receiving side holds a
//! [`MonitorBridge`], which also carries commands back to the thread.
//!
//! Snapshots are dropped, not queued, when the receiver falls behind.

use crate::engine::snapshot::SystemSnapshot;
use crate::engine::EventSystem;
use crate::error::{EngineError, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Channel capacity for commands (bridge → monitor)
const CMD_CHANNEL_CAPACITY: usize = 16;
/// Channel capacity for snapshots (monitor → bridge)
const MSG_CHANNEL_CAPACITY: usize = 64;

/// Commands accepted by the monitor thread
#[derive(Debug, Clone)]
pub enum MonitorCommand {
    /// Change the publishing interval
    SetInterval(Duration),
    /// Stop the monitor thread
    Shutdown,
}

/// Messages published by the monitor thread
#[derive(Debug, Clone)]
pub enum MonitorMessage {
    Snapshot(Arc<SystemSnapshot>),
    /// The monitor thread has exited
    Stopped,
}

/// Receiver-side handle of a monitor
pub struct MonitorBridge {
    pub cmd_tx: Sender<MonitorCommand>,
    pub msg_rx: Receiver<MonitorMessage>,
}

impl MonitorBridge {
    /// Drain all pending messages
    pub fn drain(&self) -> Vec<MonitorMessage> {
        let mut msgs = Vec::new();
        while let Ok(msg) = self.msg_rx.try_recv() {
            msgs.push(msg);
        }
        msgs
    }

    /// Try to receive a single message without blocking
    pub fn try_recv(&self) -> Option<MonitorMessage> {
        self.msg_rx.try_recv().ok()
    }

    /// Wait up to `timeout` for the next message
    pub fn recv_timeout(&self, timeout: Duration) -> Option<MonitorMessage> {
        self.msg_rx.recv_timeout(timeout).ok()
    }

    pub fn set_interval(&self, interval: Duration) {
        let _ = self.cmd_tx.send(MonitorCommand::SetInterval(interval));
    }

    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(MonitorCommand::Shutdown);
    }
}

/// Periodic snapshot worker
pub struct Monitor {
    system: Arc<EventSystem>,
    interval: Duration,
    cmd_rx: Receiver<MonitorCommand>,
    msg_tx: Sender<MonitorMessage>,
    published: u64,
    dropped: u64,
}

impl Monitor {
    /// Create a monitor and the bridge used to talk to it
    pub fn new(system: Arc<EventSystem>, interval: Duration) -> (Self, MonitorBridge) {
        let (cmd_tx, cmd_rx) = bounded(CMD_CHANNEL_CAPACITY);
        let (msg_tx, msg_rx) = bounded(MSG_CHANNEL_CAPACITY);
        let monitor = Self {
            system,
            interval,
            cmd_rx,
            msg_tx,
            published: 0,
            dropped: 0,
        };
        (monitor, MonitorBridge { cmd_tx, msg_rx })
    }

    /// Start a monitor on its own thread
    pub fn spawn(
        system: Arc<EventSystem>,
        interval: Duration,
    ) -> Result<(JoinHandle<()>, MonitorBridge)> {
        let (monitor, bridge) = Self::new(system, interval);
        let handle = thread::Builder::new()
            .name("monitor".into())
            .spawn(move || monitor.run())
            .map_err(|e| EngineError::Io(e).with_context("Failed to spawn monitor thread"))?;
        Ok((handle, bridge))
    }

    /// Run the monitor loop until shut down or the bridge is dropped
    pub fn run(mut self) {
        tracing::info!("Monitor started ({:?} interval)", self.interval);

        let mut next = Instant::now() + self.interval;
        loop {
            let wait = next.saturating_duration_since(Instant::now());
            match self.cmd_rx.recv_timeout(wait) {
                Ok(MonitorCommand::SetInterval(interval)) => {
                    tracing::debug!("Monitor interval set to {:?}", interval);
                    self.interval = interval;
                    next = Instant::now() + interval;
                }
                Ok(MonitorCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    self.publish();
                    next = Instant::now() + self.interval;
                }
            }
        }

        let _ = self.msg_tx.try_send(MonitorMessage::Stopped);
        tracing::info!(
            "Monitor stopped ({} snapshots published, {} dropped)",
            self.published,
            self.dropped
        );
    }

    fn publish(&mut self) {
        let snapshot = self.system.snapshot();
        if !snapshot.census.is_settled() {
            tracing::debug!("Census not settled: {:?}", snapshot.census);
        }

        match self.msg_tx.try_send(MonitorMessage::Snapshot(snapshot)) {
            Ok(()) => self.published += 1,
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                tracing::trace!("Monitor channel full, snapshot dropped");
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}
