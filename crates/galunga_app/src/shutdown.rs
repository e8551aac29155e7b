//! Cooperative shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use tracing::{info, warn};

/// A flag any thread can raise; the tick loops check it once per iteration.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    /// A flag that is not yet raised.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag.
    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns `true` once any clone has raised the flag.
    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Raise the flag on Ctrl-C. The watcher runs on its own thread with a
    /// single-threaded tokio runtime and exits after the first signal.
    ///
    /// # Errors
    ///
    /// Fails if the runtime or thread cannot be created.
    pub fn watch_ctrl_c(&self) -> std::io::Result<JoinHandle<()>> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let flag = self.clone();
        std::thread::Builder::new()
            .name("ctrl-c".into())
            .spawn(move || {
                runtime.block_on(async move {
                    match tokio::signal::ctrl_c().await {
                        Ok(()) => {
                            info!("interrupt received, shutting down");
                            flag.request();
                        }
                        Err(e) => warn!(error = %e, "cannot listen for interrupts"),
                    }
                });
            })
    }
}
