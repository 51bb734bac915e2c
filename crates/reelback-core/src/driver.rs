//! Async driver.
//!
//! Owns a [`ReplayContainer`] on a spawned task and feeds it commands from
//! an mpsc channel, sleeping until the container's next deadline in
//! between. This is the only place real time enters the system: the loop
//! maps tokio's instant domain onto epoch milliseconds, so under a paused
//! test clock the whole pipeline advances deterministically.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, sleep_until};
use tracing::debug;

use crate::container::{ContainerStatus, ReplayContainer};
use crate::error::{Error, Result};
use crate::frame::RecordingFrame;
use crate::session::epoch_ms;
use crate::transport::TransportSender;

const COMMAND_BUFFER: usize = 256;

enum ReplayCommand {
    Frame(RecordingFrame),
    Touch,
    ErrorFlush,
    FlushNow,
    Status(oneshot::Sender<ContainerStatus>),
    Stop(oneshot::Sender<()>),
}

/// Maps tokio's (pausable) instant domain onto epoch milliseconds.
struct DriverClock {
    origin: Instant,
    epoch_at_origin: u64,
}

impl DriverClock {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
            epoch_at_origin: epoch_ms(),
        }
    }

    fn now_ms(&self) -> u64 {
        let elapsed = u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.epoch_at_origin.saturating_add(elapsed)
    }

    fn instant_at(&self, at_ms: u64) -> Instant {
        self.origin + Duration::from_millis(at_ms.saturating_sub(self.epoch_at_origin))
    }
}

/// Handle to a running replay driver. Dropping it without calling
/// [`ReplayHandle::stop`] still shuts the task down cleanly: the loop stops
/// the container (best-effort final flush included) when the channel
/// closes.
pub struct ReplayHandle {
    tx: mpsc::Sender<ReplayCommand>,
    join: JoinHandle<()>,
}

impl ReplayHandle {
    /// Feed one captured frame to the container.
    pub async fn record_frame(&self, frame: RecordingFrame) -> Result<()> {
        self.send(ReplayCommand::Frame(frame)).await
    }

    /// Register host-driven user activity that produced no frame.
    pub async fn touch(&self) -> Result<()> {
        self.send(ReplayCommand::Touch).await
    }

    /// Report a host error, promoting a deferred session to buffer mode.
    pub async fn trigger_error_flush(&self) -> Result<()> {
        self.send(ReplayCommand::ErrorFlush).await
    }

    /// Ask for a flush as soon as possible.
    pub async fn flush_now(&self) -> Result<()> {
        self.send(ReplayCommand::FlushNow).await
    }

    /// Snapshot of the pipeline.
    pub async fn status(&self) -> Result<ContainerStatus> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(ReplayCommand::Status(reply_tx)).await?;
        reply_rx
            .await
            .map_err(|_| Error::Runtime("replay driver dropped the status request".to_string()))
    }

    /// Stop the container (best-effort final flush) and wait for the task
    /// to finish.
    pub async fn stop(self) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(ReplayCommand::Stop(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
        self.join
            .await
            .map_err(|err| Error::Runtime(format!("replay driver task panicked: {err}")))
    }

    async fn send(&self, command: ReplayCommand) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| Error::Runtime("replay driver is not running".to_string()))
    }
}

/// Spawn the driver loop for `container`.
pub fn spawn<S>(container: ReplayContainer<S>) -> ReplayHandle
where
    S: TransportSender + 'static,
{
    let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
    let join = tokio::spawn(run_loop(container, rx));
    ReplayHandle { tx, join }
}

async fn run_loop<S: TransportSender>(
    mut container: ReplayContainer<S>,
    mut rx: mpsc::Receiver<ReplayCommand>,
) {
    let clock = DriverClock::new();
    loop {
        let deadline_ms = container.next_deadline_ms();
        // The sleep branch is disabled when no deadline is armed; the
        // placeholder instant is never awaited.
        let sleep_target = deadline_ms.map_or(clock.origin, |ms| clock.instant_at(ms));

        tokio::select! {
            maybe_command = rx.recv() => {
                let Some(command) = maybe_command else {
                    // Every handle is gone; wind down like a stop.
                    container.stop(clock.now_ms()).await;
                    break;
                };
                match command {
                    ReplayCommand::Frame(frame) => {
                        container.record_frame(frame, clock.now_ms());
                    }
                    ReplayCommand::Touch => container.touch(clock.now_ms()),
                    ReplayCommand::ErrorFlush => container.trigger_error_flush(clock.now_ms()),
                    ReplayCommand::FlushNow => container.flush_now(clock.now_ms()),
                    ReplayCommand::Status(reply) => {
                        let _ = reply.send(container.status());
                    }
                    ReplayCommand::Stop(ack) => {
                        container.stop(clock.now_ms()).await;
                        let _ = ack.send(());
                        break;
                    }
                }
            }
            () = sleep_until(sleep_target), if deadline_ms.is_some() => {
                container.tick(clock.now_ms()).await;
            }
        }
    }
    debug!("Replay driver loop exited");
}
