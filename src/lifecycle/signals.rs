//! OS signal handling.
//!
//! # Responsibilities
//! - Subscribe to the platform's termination signals and its test signal
//! - Dispatch the shutdown registry for every received signal
//! - Register the fallback handler that terminates the process
//!
//! # Design Decisions
//! - The subscription is created before the worker task is spawned, so a
//!   signal arriving while the task starts up is still delivered
//! - One worker task handles all signals; dispatches never overlap
//! - Cancellation stops listening between dispatches, never during one
//! - The fallback handler is registered only once the subscription exists

use std::fmt;
use std::io;
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::lifecycle::platform::{self, SignalPlatform};
use crate::lifecycle::shutdown::{ShutdownHandler, ShutdownRegistry, ORDER_TERMINATION};

/// Name of the fallback handler registered by [`SignalListener::activate`].
pub const TERMINATION_HANDLER: &str = "Termination";

/// A signal delivered to the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signal {
    number: i32,
    name: &'static str,
    terminates: bool,
}

impl Signal {
    pub const fn new(number: i32, name: &'static str, terminates: bool) -> Self {
        Self {
            number,
            name,
            terminates,
        }
    }

    pub fn number(&self) -> i32 {
        self.number
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the process is expected to exit on this signal.
    pub fn terminates(&self) -> bool {
        self.terminates
    }

    /// Conventional exit status for a process ended by this signal.
    pub fn exit_code(&self) -> i32 {
        128 + self.number
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.number)
    }
}

/// Background worker dispatching the shutdown registry on signals.
pub struct SignalListener {
    platform: Arc<dyn SignalPlatform>,
    cancel: CancellationToken,
    worker: JoinHandle<()>,
}

impl SignalListener {
    /// Start listening with the platform's native signal source.
    ///
    /// Must be called from within a tokio runtime.
    pub fn activate(registry: &ShutdownRegistry) -> io::Result<Self> {
        Self::activate_with(registry, platform::native(), CancellationToken::new())
    }

    /// Start listening on `platform` until `cancel` fires or the listener is
    /// deactivated.
    pub fn activate_with(
        registry: &ShutdownRegistry,
        platform: Arc<dyn SignalPlatform>,
        cancel: CancellationToken,
    ) -> io::Result<Self> {
        let mut signals = platform.subscribe()?;
        registry.add(termination_handler());

        let registry = registry.clone();
        let token = cancel.clone();

        let worker = tokio::spawn(async move {
            tracing::debug!("Signal listener started");
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    received = signals.next() => match received {
                        Some(signal) => registry.dispatch(signal).await,
                        None => {
                            tracing::warn!("Signal subscription closed");
                            break;
                        }
                    },
                }
            }
            tracing::debug!("Signal listener stopped");
        });

        Ok(Self {
            platform,
            cancel,
            worker,
        })
    }

    /// Deliver the platform's test signal to this listener.
    ///
    /// Runs the same ordered dispatch as a real termination signal without
    /// terminating the process.
    pub fn raise_test_signal(&self) -> io::Result<()> {
        self.platform.raise_test_signal()
    }

    /// Stop listening and release the OS subscription.
    ///
    /// Waits for a dispatch that is already running to finish.
    pub async fn deactivate(self) {
        self.cancel.cancel();
        if let Err(e) = self.worker.await {
            tracing::error!(error = %e, "Signal listener task failed");
        }
    }

    pub fn is_active(&self) -> bool {
        !self.worker.is_finished()
    }
}

/// Exits the process on interrupt/terminate, ignores everything else.
fn termination_handler() -> ShutdownHandler {
    ShutdownHandler::blocking(TERMINATION_HANDLER, ORDER_TERMINATION, |signal| {
        if signal.terminates() {
            tracing::info!(signal = signal.name(), code = signal.exit_code(), "Terminating process");
            std::process::exit(signal.exit_code());
        }
    })
}
