//! Leveled diagnostic messages emitted by the prediction engine.
//!
//! The engine never prints on its own: it hands messages to a [DiagnosticSink]
//! carried by the [Nav](crate::config::Nav), and only when the corresponding
//! [Print](crate::config::Print) flag is set. The default sink forwards to the
//! [log] facade, so the host application decides where messages end up.

use std::fmt::Debug;

/// Receiver of warnings and errors raised while predicting.
///
/// Implementations must be shareable across the worker threads of an ensemble.
pub trait DiagnosticSink: Debug + Send + Sync {
    fn warning(&self, message: &str);
    fn error(&self, message: &str);
}

/// Forwards diagnostics to the `log` facade under the `ssmpred` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn warning(&self, message: &str) {
        log::warn!(target: "ssmpred", "{}", message);
    }

    fn error(&self, message: &str) {
        log::error!(target: "ssmpred", "{}", message);
    }
}

/// Discards every message.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn warning(&self, _message: &str) {}
    fn error(&self, _message: &str) {}
}
