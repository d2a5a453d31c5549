//! SIGINT / SIGTERM delivery to a running batch
//!
//! Once [`Interrupt::install`] has run, neither signal terminates the process
//! any more. The first one received is latched in a watch channel. The
//! supervisor and the sandbox executor race their waits against it, so an
//! interrupted run still stops its roles and probes and runs the cleanup
//! sweep before the batch ends.

use crate::types::{AppError, Result};
use std::fmt;
use std::future::Future;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;

/// Signal that asked the harness to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    Interrupt,
    Terminate,
}

impl StopSignal {
    pub fn number(&self) -> i32 {
        match self {
            StopSignal::Interrupt => libc::SIGINT,
            StopSignal::Terminate => libc::SIGTERM,
        }
    }

    /// Shell convention for a process ended by this signal
    pub fn exit_code(&self) -> i32 {
        128 + self.number()
    }
}

impl fmt::Display for StopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopSignal::Interrupt => f.write_str("SIGINT"),
            StopSignal::Terminate => f.write_str("SIGTERM"),
        }
    }
}

/// Read side of the latch. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Interrupt {
    rx: watch::Receiver<Option<StopSignal>>,
}

/// Write side of the latch
#[derive(Debug)]
pub struct InterruptTrigger {
    tx: watch::Sender<Option<StopSignal>>,
}

impl InterruptTrigger {
    /// Latch `signal`. Later signals do not replace the first.
    pub fn fire(&self, signal: StopSignal) {
        self.tx.send_if_modified(|latched| {
            if latched.is_some() {
                return false;
            }
            *latched = Some(signal);
            true
        });
    }
}

impl Interrupt {
    /// A latch that never fires
    pub fn never() -> Self {
        let (_, rx) = watch::channel(None);
        Self { rx }
    }

    /// A latch fired by hand through the returned trigger
    pub fn manual() -> (InterruptTrigger, Self) {
        let (tx, rx) = watch::channel(None);
        (InterruptTrigger { tx }, Self { rx })
    }

    /// Route SIGINT and SIGTERM into a new latch. Needs a running tokio
    /// runtime.
    pub fn install() -> Result<Self> {
        let mut interrupt = signal(SignalKind::interrupt())
            .map_err(|e| AppError::internal(format!("Cannot handle SIGINT: {}", e)))?;
        let mut terminate = signal(SignalKind::terminate())
            .map_err(|e| AppError::internal(format!("Cannot handle SIGTERM: {}", e)))?;

        let (trigger, latch) = Self::manual();
        tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    Some(()) = interrupt.recv() => StopSignal::Interrupt,
                    Some(()) = terminate.recv() => StopSignal::Terminate,
                    else => break,
                };
                trigger.fire(received);
            }
        });
        Ok(latch)
    }

    /// The latched signal, if any
    pub fn received(&self) -> Option<StopSignal> {
        *self.rx.borrow()
    }

    /// Resolve once a signal is latched. Never resolves for [`Interrupt::never`].
    pub async fn wait(&self) -> StopSignal {
        let mut rx = self.rx.clone();
        let latched = rx.wait_for(Option::is_some).await.map(|value| *value).ok().flatten();
        match latched {
            Some(signal) => signal,
            None => std::future::pending().await,
        }
    }

    /// Run `operation` unless a signal is latched first. The operation is
    /// dropped on interrupt, which kills any process handle it owns.
    pub async fn guard<T, F>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            result = operation => result,
            signal = self.wait() => Err(AppError::interrupted(signal)),
        }
    }
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::never()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_exit_codes() {
        assert_eq!(StopSignal::Interrupt.exit_code(), 130);
        assert_eq!(StopSignal::Terminate.exit_code(), 143);
        assert_eq!(StopSignal::Interrupt.to_string(), "SIGINT");
    }

    #[tokio::test]
    async fn test_first_signal_is_latched() {
        let (trigger, latch) = Interrupt::manual();
        assert_eq!(latch.received(), None);

        trigger.fire(StopSignal::Terminate);
        trigger.fire(StopSignal::Interrupt);
        assert_eq!(latch.received(), Some(StopSignal::Terminate));
        assert_eq!(latch.clone().wait().await, StopSignal::Terminate);
    }

    #[tokio::test]
    async fn test_guard_cuts_operation_short() {
        let (trigger, latch) = Interrupt::manual();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.fire(StopSignal::Interrupt);
        });

        let result = latch
            .guard(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .await;
        let err = result.unwrap_err();
        assert_eq!(err.category(), "INTERRUPTED");
        assert_eq!(err.exit_code(), 130);
    }

    #[tokio::test]
    async fn test_never_lets_operation_finish() {
        let latch = Interrupt::never();
        let value = latch.guard(async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
        assert_eq!(latch.received(), None);
    }
}
