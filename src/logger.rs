//! Process-wide logger with `Standalone`/`Embedded` modes, generalized from
//! the teacher's `core/src/logger.rs`. In `Embedded` mode, messages are
//! pushed onto a channel instead of printed, which is how `Engine::start`
//! fans node worker-thread log events out to an embedding application
//! (spec.md §4.5).

use crossbeam_channel::{Receiver, Sender};
use std::fmt;
use std::sync::{Mutex, OnceLock};

use crate::ids::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Fatal,
    Error,
    Warn,
    Info,
    Debug,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Fatal => "FATAL",
            Severity::Error => "ERROR",
            Severity::Warn => "WARN",
            Severity::Info => "INFO",
            Severity::Debug => "DEBUG",
        };
        write!(f, "[{}]", s)
    }
}

#[derive(Debug, Clone)]
pub struct EngineLogMessage {
    pub node: Option<NodeId>,
    pub severity: Severity,
    pub text: String,
}

impl fmt::Display for EngineLogMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.node {
            Some(n) => write!(f, "{} {}: {}", self.severity, n, self.text),
            None => write!(f, "{}: {}", self.severity, self.text),
        }
    }
}

enum LoggerMode {
    Standalone,
    Embedded(Sender<EngineLogMessage>),
}

pub struct Logger {
    mode: Mutex<LoggerMode>,
}

static GLOBAL_LOGGER: OnceLock<Logger> = OnceLock::new();

impl Logger {
    fn new() -> Self {
        Logger {
            mode: Mutex::new(LoggerMode::Standalone),
        }
    }

    pub fn get() -> &'static Logger {
        GLOBAL_LOGGER.get_or_init(Logger::new)
    }

    /// Switches into `Embedded` mode and returns the receiving half of the
    /// channel the embedding application should drain. Used by `Engine`.
    pub fn set_embedded_mode() -> Receiver<EngineLogMessage> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut guard = Logger::get().mode.lock().expect("logger mutex poisoned");
        *guard = LoggerMode::Embedded(tx);
        rx
    }

    pub fn set_standalone_mode() {
        let mut guard = Logger::get().mode.lock().expect("logger mutex poisoned");
        *guard = LoggerMode::Standalone;
    }

    pub fn log(node: Option<NodeId>, severity: Severity, text: impl Into<String>) {
        let msg = EngineLogMessage {
            node,
            severity,
            text: text.into(),
        };
        let guard = Logger::get().mode.lock().expect("logger mutex poisoned");
        match &*guard {
            LoggerMode::Standalone => {
                if matches!(msg.severity, Severity::Error | Severity::Fatal) {
                    eprintln!("{}", msg);
                } else {
                    println!("{}", msg);
                }
            }
            LoggerMode::Embedded(tx) => {
                let _ = tx.send(msg);
            }
        }
    }
}

#[macro_export]
macro_rules! log_debug {
    ($node:expr, $($arg:tt)*) => {
        $crate::logger::Logger::log($node, $crate::logger::Severity::Debug, format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_info {
    ($node:expr, $($arg:tt)*) => {
        $crate::logger::Logger::log($node, $crate::logger::Severity::Info, format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($node:expr, $($arg:tt)*) => {
        $crate::logger::Logger::log($node, $crate::logger::Severity::Warn, format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_error {
    ($node:expr, $($arg:tt)*) => {
        $crate::logger::Logger::log($node, $crate::logger::Severity::Error, format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_mode_receives_messages() {
        let rx = Logger::set_embedded_mode();
        log_info!(None, "hello {}", 42);
        let msg = rx.recv_timeout(std::time::Duration::from_millis(100)).unwrap();
        assert_eq!(msg.text, "hello 42");
        Logger::set_standalone_mode();
    }
}
