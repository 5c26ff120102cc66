use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Route Ctrl-C into `flag`. The first interrupt asks the running workflow
/// to stop at the next step boundary; a second one exits immediately.
///
/// Only one handler can be installed per process; later calls are no-ops.
pub fn install_signal_handler(flag: Arc<AtomicBool>) {
    let _ = ctrlc::set_handler(move || {
        if flag.swap(true, Ordering::SeqCst) {
            std::process::exit(130);
        }
        eprintln!("\ninterrupt received, stopping after the current step...");
    });
}
