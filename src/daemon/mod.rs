//! Change-event listener: resynchronize when the account service reports a
//! relevant change.
//!
//! Events are read one at a time. Relevant events wake a single resync
//! worker; triggers arriving while a resync is running collapse into one
//! follow-up run. On a termination signal the listener stops reading, gives
//! an in-flight resync the grace period to finish, and stops.

mod events;
mod source;

pub use events::{BusEvent, EventFilter, ResyncTrigger};
pub use source::{CommandEventSource, EventSource, LineEventSource};

use crate::pipeline::{InstallOptions, Pipeline, PipelineError};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid topic pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("No event command configured")]
    NoCommand,

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("Event stream ended")]
    StreamEnded,
}

/// Lifecycle of the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    Idle,
    Listening,
    Draining,
    Stopped,
}

/// A full resynchronization.
#[async_trait]
pub trait Resync: Send + Sync {
    async fn resync(&self) -> Result<(), PipelineError>;
}

#[async_trait]
impl Resync for Pipeline {
    async fn resync(&self) -> Result<(), PipelineError> {
        let report = self.run(&InstallOptions::default()).await?;
        info!(
            accounts = report.accounts,
            locked = report.locked_homes.len(),
            "Resync complete"
        );
        Ok(())
    }
}

/// Counters for one listening session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DaemonStats {
    pub events: usize,
    pub triggers: usize,
    pub resyncs: usize,
}

pub struct Daemon {
    resync: Arc<dyn Resync>,
    filter: EventFilter,
    grace_period: Duration,
    state: watch::Sender<DaemonState>,
}

impl Daemon {
    pub fn new(resync: Arc<dyn Resync>, filter: EventFilter, grace_period: Duration) -> Self {
        let (state, _) = watch::channel(DaemonState::Idle);
        Self {
            resync,
            filter,
            grace_period,
            state,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<DaemonState> {
        self.state.subscribe()
    }

    /// Listen to `source` until `shutdown` completes or the stream ends.
    ///
    /// An ended or failing stream is returned as an error after draining.
    pub async fn run<E, F>(&self, mut source: E, shutdown: F) -> Result<DaemonStats, DaemonError>
    where
        E: EventSource,
        F: Future<Output = ()> + Send,
    {
        let wake = Arc::new(Notify::new());
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut worker = tokio::spawn(resync_worker(
            Arc::clone(&self.resync),
            Arc::clone(&wake),
            stop_rx,
        ));

        self.state.send_replace(DaemonState::Listening);
        info!("Listening for account changes");

        let mut stats = DaemonStats::default();
        tokio::pin!(shutdown);
        let outcome = loop {
            let event = tokio::select! {
                () = &mut shutdown => break Ok(()),
                event = source.next_event() => event,
            };
            let event = match event {
                Ok(Some(event)) => event,
                Ok(None) => break Err(DaemonError::StreamEnded),
                Err(e) => break Err(e),
            };

            stats.events = stats.events.saturating_add(1);
            match self.filter.classify(&event) {
                Some(trigger) => {
                    debug!(topic = %event.topic, ?trigger, "Resync requested");
                    stats.triggers = stats.triggers.saturating_add(1);
                    wake.notify_one();
                }
                None => debug!(topic = %event.topic, "Ignoring event"),
            }
        };

        self.state.send_replace(DaemonState::Draining);
        info!("Draining; waiting up to {:?} for a running resync", self.grace_period);
        let _ = stop_tx.send(true);
        match tokio::time::timeout(self.grace_period, &mut worker).await {
            Ok(Ok(resyncs)) => stats.resyncs = resyncs,
            Ok(Err(e)) => error!("Resync worker failed: {e}"),
            Err(_) => {
                warn!("Resync still running after grace period; abandoning it");
                worker.abort();
            }
        }
        self.state.send_replace(DaemonState::Stopped);
        info!(events = stats.events, triggers = stats.triggers, "Listener stopped");

        outcome.map(|()| stats)
    }
}

/// Run one resync per wake-up until told to stop.
///
/// `Notify` keeps at most one pending wake-up, so any number of triggers
/// during a resync yields exactly one more run.
async fn resync_worker(
    resync: Arc<dyn Resync>,
    wake: Arc<Notify>,
    mut stop: watch::Receiver<bool>,
) -> usize {
    let mut runs: usize = 0;
    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            () = wake.notified() => {}
        }
        runs = runs.saturating_add(1);
        info!("Resynchronizing accounts");
        if let Err(e) = resync.resync().await {
            error!("Resync failed: {e}");
        }
    }
    runs
}

/// Handlers for the signals that stop the listener, registered up front.
pub struct TerminationSignals {
    terminate: Signal,
    interrupt: Signal,
    hangup: Signal,
    quit: Signal,
}

impl TerminationSignals {
    pub fn register() -> std::io::Result<Self> {
        Ok(Self {
            terminate: signal(SignalKind::terminate())?,
            interrupt: signal(SignalKind::interrupt())?,
            hangup: signal(SignalKind::hangup())?,
            quit: signal(SignalKind::quit())?,
        })
    }

    /// Wait for the first of the signals and return its name.
    pub async fn recv(&mut self) -> &'static str {
        let name = tokio::select! {
            _ = self.terminate.recv() => "SIGTERM",
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.hangup.recv() => "SIGHUP",
            _ = self.quit.recv() => "SIGQUIT",
        };
        info!("Caught signal {name}");
        name
    }
}

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
