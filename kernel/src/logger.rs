//! Kernel logger — бэкенд фасада `log` / backend for the `log` facade
//!
//! Каждая запись — одна строка `[<модуль>] <LEVEL>: <сообщение>`.
//! Every record is one line `[<module>] <LEVEL>: <message>`.

use core::fmt;

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use spin::Once;

/// Куда уходят готовые строки / Where finished lines go.
pub type Sink = fn(fmt::Arguments<'_>);

struct KernelLogger {
    sink: Once<Sink>,
}

static LOGGER: KernelLogger = KernelLogger { sink: Once::new() };

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if let Some(sink) = self.sink.get() {
            sink(format_args!("{}\n", Line(record)));
        }
    }

    fn flush(&self) {}
}

/// Последний сегмент цели: `cupruxos_mm::mm::vmm` → `vmm`.
/// Last segment of the target: `cupruxos_mm::mm::vmm` → `vmm`.
pub fn module(target: &str) -> &str {
    target.rsplit("::").next().unwrap_or(target)
}

/// Строка лога без перевода строки / A log line without the newline.
pub struct Line<'a, 'r>(pub &'a Record<'r>);

impl fmt::Display for Line<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", module(self.0.target()), self.0.level(), self.0.args())
    }
}

/// Установить логгер. Второй вызов возвращает `SetLoggerError`.
/// Install the logger. A second call returns `SetLoggerError`.
pub fn init(sink: Sink, level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    LOGGER.sink.call_once(|| sink);
    log::set_max_level(level);
    Ok(())
}

/// Логгер в COM1 / Logger into COM1.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub fn init_serial(level: LevelFilter) -> Result<(), SetLoggerError> {
    crate::drivers::uart::init();
    init(crate::drivers::uart::print_args, level)
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Level;
    use std::string::{String, ToString};
    use std::sync::Mutex;

    #[test]
    fn module_is_last_segment() {
        assert_eq!(module("cupruxos_mm::mm::vmm"), "vmm");
        assert_eq!(module("heap"), "heap");
    }

    #[test]
    fn line_format() {
        let line = Line(
            &Record::builder()
                .args(format_args!("mapped {} pages", 3))
                .level(Level::Debug)
                .target("cupruxos_mm::mm::pagemap")
                .build(),
        )
        .to_string();
        assert_eq!(line, "[pagemap] DEBUG: mapped 3 pages");
    }

    static CAPTURED: Mutex<String> = Mutex::new(String::new());

    fn capture(args: fmt::Arguments<'_>) {
        use fmt::Write;
        CAPTURED.lock().unwrap().write_fmt(args).unwrap();
    }

    #[test]
    fn init_once_then_log() {
        init(capture, LevelFilter::Info).unwrap();
        assert!(init(capture, LevelFilter::Info).is_err());

        // Другие тесты тоже пишут в лог — ищем только свои строки.
        // Other tests log too, so look for our own lines only.
        log::info!(target: "cupruxos_mm::logger_probe", "ready");
        log::debug!(target: "cupruxos_mm::logger_probe", "hidden");

        let captured = CAPTURED.lock().unwrap();
        assert!(captured.contains("[logger_probe] INFO: ready\n"));
        assert!(!captured.contains("hidden"));
    }
}
