use std::any::Any;
use std::panic;

use log::error;

/// Install the process panic hooks.
///
/// Debug builds get `better_panic` backtraces, release builds the
/// `human_panic` crash report. Either way the panic is logged first. The hook
/// never exits, so panics caught on the reformat worker stay recoverable.
pub fn initialize_panic_handler() {
    if cfg!(debug_assertions) {
        better_panic::install();
    } else {
        human_panic::setup_panic!();
    }

    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let thread = std::thread::current();
        error!(
            "Panic on thread '{}': {panic_info}",
            thread.name().unwrap_or("<unnamed>")
        );
        default_hook(panic_info);
    }));
}

/// Best-effort text of a caught panic payload
#[must_use]
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
