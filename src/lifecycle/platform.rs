//! Platform specific signal sources.
//!
//! POSIX targets listen for SIGINT and SIGTERM and reserve SIGUSR1 for tests.
//! Windows has no user signal, so its test signal is an in-process event.

use std::io;
use std::sync::Arc;

use futures_util::stream::BoxStream;

use crate::lifecycle::signals::Signal;

/// Capabilities the signal listener needs from the operating system.
pub trait SignalPlatform: Send + Sync + 'static {
    /// Subscribe to all handled signals.
    ///
    /// Signals delivered after this returns are buffered until the stream is
    /// polled. Dropping the stream releases the subscription.
    fn subscribe(&self) -> io::Result<BoxStream<'static, Signal>>;

    /// Resolve a signal number to its platform name.
    fn signal_name(&self, number: i32) -> Option<&'static str>;

    /// The signal used to trigger shutdown handlers in tests.
    fn test_signal(&self) -> Signal;

    /// Deliver [`SignalPlatform::test_signal`] to the running process.
    fn raise_test_signal(&self) -> io::Result<()>;
}

/// Signal source for the current build target.
pub fn native() -> Arc<dyn SignalPlatform> {
    #[cfg(unix)]
    {
        Arc::new(UnixSignals)
    }
    #[cfg(windows)]
    {
        Arc::new(WindowsSignals::new())
    }
}

#[cfg(unix)]
pub use self::unix::UnixSignals;

#[cfg(windows)]
pub use self::windows::WindowsSignals;

#[cfg(unix)]
mod unix {
    use super::*;
    use futures_util::stream::{self, StreamExt};
    use nix::sys::signal::{self as nix_signal, Signal as NixSignal};
    use tokio::signal::unix::{signal, SignalKind};

    const HANDLED: [(NixSignal, bool); 3] = [
        (NixSignal::SIGINT, true),
        (NixSignal::SIGTERM, true),
        (NixSignal::SIGUSR1, false),
    ];

    /// SIGINT, SIGTERM and SIGUSR1 via tokio's signal driver.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct UnixSignals;

    impl UnixSignals {
        fn signal(&self, kind: NixSignal, terminates: bool) -> Signal {
            Signal::new(kind as i32, kind.as_str(), terminates)
        }
    }

    impl SignalPlatform for UnixSignals {
        fn subscribe(&self) -> io::Result<BoxStream<'static, Signal>> {
            let mut sources = Vec::with_capacity(HANDLED.len());
            for (kind, terminates) in HANDLED {
                let delivered = self.signal(kind, terminates);
                let receiver = signal(SignalKind::from_raw(kind as i32))?;
                sources.push(
                    stream::unfold(receiver, move |mut receiver| async move {
                        receiver.recv().await.map(|()| (delivered, receiver))
                    })
                    .boxed(),
                );
            }
            Ok(stream::select_all(sources).boxed())
        }

        fn signal_name(&self, number: i32) -> Option<&'static str> {
            NixSignal::try_from(number).ok().map(NixSignal::as_str)
        }

        fn test_signal(&self) -> Signal {
            self.signal(NixSignal::SIGUSR1, false)
        }

        fn raise_test_signal(&self) -> io::Result<()> {
            nix_signal::raise(NixSignal::SIGUSR1).map_err(io::Error::from)
        }
    }

}

#[cfg(windows)]
mod windows {
    use super::*;
    use futures_util::stream::{self, StreamExt};
    use tokio::signal::windows;
    use tokio::sync::broadcast;

    // Console events carry the number of the POSIX signal they stand for, so
    // the fallback handler exits with the same codes on every platform.
    const CTRL_C: Signal = Signal::new(2, "CTRL_C_EVENT", true);
    const CTRL_BREAK: Signal = Signal::new(2, "CTRL_BREAK_EVENT", true);
    const CTRL_CLOSE: Signal = Signal::new(15, "CTRL_CLOSE_EVENT", true);
    const CTRL_LOGOFF: Signal = Signal::new(15, "CTRL_LOGOFF_EVENT", true);
    const CTRL_SHUTDOWN: Signal = Signal::new(15, "CTRL_SHUTDOWN_EVENT", true);
    const SYNTHETIC: Signal = Signal::new(0, "SYNTHETIC_EVENT", false);

    macro_rules! console_events {
        ($listen:path, $signal:expr) => {{
            let receiver = $listen()?;
            stream::unfold(receiver, |mut receiver| async move {
                receiver.recv().await.map(|()| ($signal, receiver))
            })
            .boxed()
        }};
    }

    /// Console control events plus an in-process test event.
    #[derive(Debug)]
    pub struct WindowsSignals {
        synthetic: broadcast::Sender<()>,
    }

    impl WindowsSignals {
        pub fn new() -> Self {
            let (synthetic, _) = broadcast::channel(4);
            Self { synthetic }
        }
    }

    impl Default for WindowsSignals {
        fn default() -> Self {
            Self::new()
        }
    }

    impl SignalPlatform for WindowsSignals {
        fn subscribe(&self) -> io::Result<BoxStream<'static, Signal>> {
            let synthetic = stream::unfold(self.synthetic.subscribe(), |mut receiver| async move {
                loop {
                    match receiver.recv().await {
                        Ok(()) => return Some((SYNTHETIC, receiver)),
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            })
            .boxed();

            Ok(stream::select_all([
                console_events!(windows::ctrl_c, CTRL_C),
                console_events!(windows::ctrl_break, CTRL_BREAK),
                console_events!(windows::ctrl_close, CTRL_CLOSE),
                console_events!(windows::ctrl_logoff, CTRL_LOGOFF),
                console_events!(windows::ctrl_shutdown, CTRL_SHUTDOWN),
                synthetic,
            ])
            .boxed())
        }

        fn signal_name(&self, number: i32) -> Option<&'static str> {
            match number {
                2 => Some("SIGINT"),
                15 => Some("SIGTERM"),
                0 => Some(SYNTHETIC.name()),
                _ => None,
            }
        }

        fn test_signal(&self) -> Signal {
            SYNTHETIC
        }

        fn raise_test_signal(&self) -> io::Result<()> {
            self.synthetic
                .send(())
                .map(|_| ())
                .map_err(|_| io::Error::new(io::ErrorKind::NotConnected, "no signal listener subscribed"))
        }
    }
}
