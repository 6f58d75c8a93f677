//! A `log::Log` backend that forwards records to syslog, for deployments
//! that want the original's `otbrLog` → `syslog(3)` routing instead of
//! `env_logger`'s stderr output.
//!
//! No `syslog`/`libc` dependency is pulled in for this — neither crate
//! appears anywhere in the teacher's dependency stack, and the one thing
//! this adapter needs (handing a formatted line to the system log) is
//! exactly what the `logger(1)` utility is for. This mirrors
//! `backbone::ShellMulticastRouteCommands`'s choice to shell out rather
//! than link a syscall wrapper for a single narrow need.

use std::process::{Command, Stdio};

use log::{Level, Log, Metadata, Record};

/// Matches `main.cpp`'s `kSyslogIdent = "otbr-agent"` — renamed to this
/// agent's own process name.
const SYSLOG_IDENT: &str = "thread-br-agent";

pub struct SyslogAdapter {
    max_level: Level,
}

impl SyslogAdapter {
    pub fn new(max_level: Level) -> Self {
        Self { max_level }
    }

    /// Installs this adapter as the global logger, matching
    /// `env_logger::init_from_env`'s call site but routing to syslog.
    pub fn install(max_level: Level) -> Result<(), log::SetLoggerError> {
        log::set_max_level(max_level.to_level_filter());
        log::set_boxed_logger(Box::new(Self::new(max_level)))
    }

    fn priority(level: Level) -> &'static str {
        match level {
            Level::Error => "err",
            Level::Warn => "warning",
            Level::Info => "info",
            Level::Debug => "debug",
            Level::Trace => "debug",
        }
    }
}

impl Log for SyslogAdapter {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let line = format!("{}: {}", record.target(), record.args());

        let status = Command::new("logger")
            .arg("-t")
            .arg(SYSLOG_IDENT)
            .arg("-p")
            .arg(format!("daemon.{}", Self::priority(record.level())))
            .arg(line)
            .stdin(Stdio::null())
            .status();

        if let Err(err) = status {
            eprintln!("{SYSLOG_IDENT}: failed to forward log line to syslog: {err}");
        }
    }

    fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_maps_trace_and_debug_to_syslog_debug() {
        assert_eq!(SyslogAdapter::priority(Level::Trace), "debug");
        assert_eq!(SyslogAdapter::priority(Level::Debug), "debug");
    }

    #[test]
    fn priority_maps_error_to_err() {
        assert_eq!(SyslogAdapter::priority(Level::Error), "err");
    }
}
