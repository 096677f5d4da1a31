//! Logger implementation.
//!
//! Implements `log::Log` and routes records to a host-supplied sink
//! instead of a hardwired console — this workspace ships no console
//! driver (`spec.md` §1 scopes that out), so a boot shim hands in
//! whatever byte sink it has (serial port, test buffer, ...) when it
//! calls [`init`].

use log::{Level, LevelFilter, Metadata, Record};
use los_utils::Once;

static LOGGER: Once<SimpleLogger> = Once::new();

/// Logger that writes every record through a fixed sink function.
pub struct SimpleLogger {
    sink: fn(core::fmt::Arguments),
}

impl log::Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Trace
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            (self.sink)(*record.args());
        }
    }

    fn flush(&self) {}
}

/// Install the global logger with the given sink and level filter.
///
/// # Panics
/// Panics if a logger has already been installed — matching the
/// teacher's fail-fast double-init behavior.
pub fn init(sink: fn(core::fmt::Arguments), max_level: LevelFilter) {
    let logger = LOGGER.call_once(|| SimpleLogger { sink });
    log::set_logger(logger).expect("logger already installed");
    log::set_max_level(max_level);
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};

    static CALLS: AtomicUsize = AtomicUsize::new(0);

    fn counting_sink(_args: core::fmt::Arguments) {
        CALLS.fetch_add(1, Ordering::Relaxed);
    }

    #[test]
    fn enabled_accepts_up_to_trace() {
        let logger = SimpleLogger { sink: counting_sink };
        let metadata = Metadata::builder().level(Level::Trace).target("x").build();
        assert!(logger.enabled(&metadata));
    }
}
