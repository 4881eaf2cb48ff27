//! Per-call diagnostic context
//!
//! Every command execution gets its own [`CallContext`]: an isolated place
//! to accumulate log lines and capture the first error, with the delivery
//! mode deciding what ultimately reaches the sink. A context is forked from
//! a parent for the duration of one call and is never shared between
//! concurrent calls.

use std::sync::{Arc, Mutex};

use crate::errors::ErrorCode;

// ----------------------------------------------------------------------------
// Delivery Modes
// ----------------------------------------------------------------------------

/// What happens to messages logged into a context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Every message goes to the sink as it is produced
    Immediate,
    /// Messages accumulate; recording an error delivers them all, plus the
    /// error, in one atomic batch. No error, no delivery.
    BufferUntilError,
    /// Messages accumulate and are delivered only by an explicit flush;
    /// a context dropped unflushed delivers nothing.
    BufferUntilFlush,
    /// Test-run mode. Buffers like [`DeliveryMode::BufferUntilFlush`] and
    /// refuses to be re-derived into any other mode.
    Pinned,
}

// ----------------------------------------------------------------------------
// Diagnostic Sink
// ----------------------------------------------------------------------------

/// Destination for delivered diagnostics
pub trait DiagnosticSink: Send + Sync {
    /// Deliver a batch of lines. A batch is atomic: buffered modes hand
    /// over everything they held in a single call.
    fn deliver(&self, lines: &[String]);

    /// Report a context-level warning (e.g. buffer overflow)
    fn warn(&self, message: &str);
}

/// Default sink forwarding to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn deliver(&self, lines: &[String]) {
        for line in lines {
            tracing::info!(target: "parley::context", "{}", line);
        }
    }

    fn warn(&self, message: &str) {
        tracing::warn!(target: "parley::context", "{}", message);
    }
}

/// Collecting sink for tests: records each delivered batch separately so
/// atomicity is observable
#[derive(Debug, Default)]
pub struct MemorySink {
    batches: Mutex<Vec<Vec<String>>>,
    warnings: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Batches delivered so far, in order
    pub fn batches(&self) -> Vec<Vec<String>> {
        self.batches.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    /// All delivered lines, flattened
    pub fn lines(&self) -> Vec<String> {
        self.batches().into_iter().flatten().collect()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.warnings.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }
}

impl DiagnosticSink for MemorySink {
    fn deliver(&self, lines: &[String]) {
        self.batches
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(lines.to_vec());
    }

    fn warn(&self, message: &str) {
        self.warnings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(message.to_string());
    }
}

// ----------------------------------------------------------------------------
// First Error
// ----------------------------------------------------------------------------

/// The error that caused a context dump. Set once, then immutable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirstError {
    pub code: ErrorCode,
    pub message: String,
    /// Rendered source error, when one exists
    pub cause: Option<String>,
}

impl FirstError {
    fn render(&self) -> String {
        match &self.cause {
            Some(cause) => format!("[{}] {} ({})", self.code, self.message, cause),
            None => format!("[{}] {}", self.code, self.message),
        }
    }
}

// ----------------------------------------------------------------------------
// Call Context
// ----------------------------------------------------------------------------

/// Default cap on buffered messages when none is configured
pub const DEFAULT_MAX_BUFFERED: usize = 500;

/// A per-call diagnostic scope
pub struct CallContext {
    mode: DeliveryMode,
    sink: Arc<dyn DiagnosticSink>,
    buffer: Vec<String>,
    first_error: Option<FirstError>,
    suspend_background_checks: bool,
    max_buffered: usize,
    delivered: bool,
}

impl CallContext {
    pub fn new(mode: DeliveryMode, sink: Arc<dyn DiagnosticSink>, max_buffered: usize) -> Self {
        Self {
            mode,
            sink,
            buffer: Vec::new(),
            first_error: None,
            suspend_background_checks: false,
            max_buffered: max_buffered.max(1),
            delivered: false,
        }
    }

    /// Root context with the default tracing sink
    pub fn root(mode: DeliveryMode) -> Self {
        Self::new(mode, Arc::new(TracingSink), DEFAULT_MAX_BUFFERED)
    }

    /// Derive a child context for one call.
    ///
    /// The child shares the sink and configuration but starts with an empty
    /// buffer and no error; it never aliases the parent's buffer. A pinned
    /// parent ignores the requested mode and yields a pinned child.
    pub fn fork(&self, mode: DeliveryMode) -> CallContext {
        let mode = if self.mode == DeliveryMode::Pinned {
            DeliveryMode::Pinned
        } else {
            mode
        };
        CallContext {
            mode,
            sink: Arc::clone(&self.sink),
            buffer: Vec::new(),
            first_error: None,
            suspend_background_checks: self.suspend_background_checks,
            max_buffered: self.max_buffered,
            delivered: false,
        }
    }

    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    /// Record a diagnostic line
    pub fn log<L: Into<String>>(&mut self, line: L) {
        if self.buffer.len() >= self.max_buffered {
            // Cap reached: drop the backlog rather than grow without bound.
            self.sink.warn(&format!(
                "diagnostic buffer overflow: {} messages discarded",
                self.buffer.len()
            ));
            self.buffer.clear();
        }
        let line = line.into();
        if self.mode == DeliveryMode::Immediate {
            self.sink.deliver(std::slice::from_ref(&line));
        }
        self.buffer.push(line);
    }

    /// Record the error that caused this call to fail. The first call wins;
    /// later calls are no-ops, so the diagnostic that triggered a dump stays
    /// stable while downstream code unwinds.
    pub fn set_first_error<M: Into<String>>(
        &mut self,
        code: ErrorCode,
        message: M,
        cause: Option<String>,
    ) {
        if self.first_error.is_some() {
            return;
        }
        let error = FirstError {
            code,
            message: message.into(),
            cause,
        };
        match self.mode {
            DeliveryMode::Immediate => {
                self.sink.deliver(std::slice::from_ref(&error.render()));
            }
            DeliveryMode::BufferUntilError => self.deliver_batch(Some(&error)),
            DeliveryMode::BufferUntilFlush | DeliveryMode::Pinned => {}
        }
        self.first_error = Some(error);
    }

    pub fn first_error(&self) -> Option<&FirstError> {
        self.first_error.as_ref()
    }

    pub fn has_error(&self) -> bool {
        self.first_error.is_some()
    }

    /// Deliver whatever the context holds, once
    pub fn flush(&mut self) {
        if self.mode == DeliveryMode::Immediate {
            return;
        }
        let error = self.first_error.clone();
        self.deliver_batch(error.as_ref());
    }

    /// Render the buffered diagnostics (plus the first error, when set) for
    /// use as an error envelope's technical detail
    pub fn dump(&self) -> String {
        let mut lines: Vec<&str> = self.buffer.iter().map(String::as_str).collect();
        let rendered;
        if let Some(error) = &self.first_error {
            rendered = error.render();
            lines.push(&rendered);
        }
        lines.join("\n")
    }

    /// Suppress background housekeeping (e.g. store integrity sweeps) for
    /// the remainder of this call
    pub fn suspend_background_checks(&mut self, suspend: bool) {
        self.suspend_background_checks = suspend;
    }

    pub fn background_checks_suspended(&self) -> bool {
        self.suspend_background_checks
    }

    fn deliver_batch(&mut self, error: Option<&FirstError>) {
        if self.delivered {
            return;
        }
        let mut batch = self.buffer.clone();
        if let Some(error) = error {
            batch.push(error.render());
        }
        if !batch.is_empty() {
            self.sink.deliver(&batch);
        }
        self.delivered = true;
    }
}

impl core::fmt::Debug for CallContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CallContext")
            .field("mode", &self.mode)
            .field("buffered", &self.buffer.len())
            .field("first_error", &self.first_error)
            .field("suspend_background_checks", &self.suspend_background_checks)
            .finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
