use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use console::Term;

/// Shutdown flag shared with running batches as their cancel flag.
static SHUTDOWN_REQUESTED: OnceLock<Arc<AtomicBool>> = OnceLock::new();

/// The flag flipped by the first Ctrl+C.
pub(crate) fn shutdown_flag() -> Arc<AtomicBool> {
    Arc::clone(SHUTDOWN_REQUESTED.get_or_init(|| Arc::new(AtomicBool::new(false))))
}

#[inline]
fn request_shutdown() {
    shutdown_flag().store(true, Ordering::Release);
}

/// Set up the Ctrl+C handler for graceful shutdown.
///
/// The first Ctrl+C stops dispatching new items; in-flight items finish and
/// the job is recorded as cancelled. A second Ctrl+C exits immediately.
pub(crate) fn setup_shutdown_handler() {
    tokio::spawn(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to install Ctrl+C handler");
            return;
        }

        let is_tty = Term::stdout().is_term();
        if is_tty {
            eprintln!("\n\nShutdown requested, finishing in-flight repositories...");
            eprintln!("Press Ctrl+C again to force quit.");
        } else {
            tracing::warn!("Shutdown requested, finishing in-flight repositories");
        }

        request_shutdown();

        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }

        if is_tty {
            eprintln!("Force quit!");
        }
        std::process::exit(130);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_flag_is_shared() {
        let a = shutdown_flag();
        let b = shutdown_flag();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
