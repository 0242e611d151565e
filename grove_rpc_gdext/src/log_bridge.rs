// `log` backend that prints through Godot.
//
// Installed once when the extension reaches the scene init level. Records
// at `Info` and above are forwarded; `Debug`/`Trace` are dropped so the
// per-call chatter of the worker threads stays out of the editor console.

use std::sync::Once;

use godot::prelude::{godot_error, godot_print, godot_warn};
use log::{Level, LevelFilter, Log, Metadata, Record};

struct GodotLogger;

static LOGGER: GodotLogger = GodotLogger;
static INSTALL: Once = Once::new();

impl Log for GodotLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Info
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let target = record.target();
        match record.level() {
            Level::Error => godot_error!("[{target}] {}", record.args()),
            Level::Warn => godot_warn!("[{target}] {}", record.args()),
            _ => godot_print!("[{target}] {}", record.args()),
        }
    }

    fn flush(&self) {}
}

pub fn install() {
    INSTALL.call_once(|| {
        // Another logger may already be set by the host; keep it.
        if log::set_logger(&LOGGER).is_ok() {
            log::set_max_level(LevelFilter::Info);
        }
    });
}
