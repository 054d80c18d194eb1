//! Message bus, progress steps and status queries
//!
//! Handlers form a stack. A message is offered to the newest handler first
//! and stops at the first one that returns `true`. Messages nobody consumes
//! are written to the log.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;

/// Message category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Failure report
    Error,
    /// Recoverable problem
    Warning,
    /// Informational note
    Info,
    /// Plain output text
    Output,
    /// Only emitted in verbose mode
    Verbose,
    /// Progress update
    Progress,
    /// Out-of-band control message
    Control,
}

impl MessageType {
    /// Lowercase label
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Error => "error",
            MessageType::Warning => "warning",
            MessageType::Info => "info",
            MessageType::Output => "output",
            MessageType::Verbose => "verbose",
            MessageType::Progress => "progress",
            MessageType::Control => "control",
        }
    }
}

/// A message on the bus
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Category
    pub kind: MessageType,
    /// Time the message was created
    pub timestamp: SystemTime,
    /// Main text
    pub text: String,
    /// Additional detail, may be empty
    pub detail: String,
    /// Overall progress fraction for progress messages, else 0
    pub progress: f32,
}

impl Message {
    /// New message stamped with the current time
    pub fn new(kind: MessageType, text: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            timestamp: SystemTime::now(),
            text: text.into(),
            detail: detail.into(),
            progress: 0.0,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.text)?;
        if !self.detail.is_empty() {
            write!(f, " ({})", self.detail)?;
        }
        Ok(())
    }
}

/// Handle for removing a pushed handler
pub type HandlerId = u64;

type MessageHandler = Arc<dyn Fn(&Message) -> bool + Send + Sync>;
type StatusQueryHandler = Arc<dyn Fn() -> bool + Send + Sync>;

/// Handler stacks and the progress step stack
pub struct MessageBus {
    handlers: Mutex<Vec<(HandlerId, MessageHandler)>>,
    status_handlers: Mutex<Vec<StatusQueryHandler>>,
    progress_steps: Mutex<Vec<(f32, f32)>>,
    next_id: AtomicU64,
    verbose: AtomicBool,
}

impl MessageBus {
    /// Empty bus
    pub fn new(verbose: bool) -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
            status_handlers: Mutex::new(Vec::new()),
            progress_steps: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            verbose: AtomicBool::new(verbose),
        }
    }

    /// Whether verbose messages are emitted
    pub fn verbose(&self) -> bool {
        self.verbose.load(Ordering::Relaxed)
    }

    /// Toggle verbose messages
    pub fn set_verbose(&self, flag: bool) {
        self.verbose.store(flag, Ordering::Relaxed);
    }

    // ========================================================================
    // Handlers
    // ========================================================================

    /// Push a handler; it sees messages before every older handler
    pub fn push_message_handler<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&Message) -> bool + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers.lock().push((id, Arc::new(handler)));
        id
    }

    /// Pop the newest handler; false when the stack is empty
    pub fn pop_message_handler(&self) -> bool {
        if self.handlers.lock().pop().is_none() {
            tracing::error!("pop_message_handler() called on empty handler stack");
            return false;
        }
        true
    }

    /// Remove a specific handler
    pub fn remove_message_handler(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.lock();
        let before = handlers.len();
        handlers.retain(|(hid, _)| *hid != id);
        handlers.len() != before
    }

    /// Number of installed handlers
    pub fn handler_count(&self) -> usize {
        self.handlers.lock().len()
    }

    /// Offer a message to the handlers; true if one consumed it
    pub fn handle_message(&self, msg: &Message) -> bool {
        // handlers may push or pop while running, so call them unlocked
        let snapshot: Vec<MessageHandler> = self
            .handlers
            .lock()
            .iter()
            .rev()
            .map(|(_, h)| h.clone())
            .collect();
        let consumed = snapshot.iter().any(|handler| handler(msg));
        if consumed {
            tracing::debug!(kind = msg.kind.as_str(), detail = %msg.detail, "{}", msg.text);
        } else {
            log_unhandled(msg);
        }
        consumed
    }

    // ========================================================================
    // Senders
    // ========================================================================

    /// Send an error message
    pub fn send_error(&self, text: impl Into<String>, detail: impl Into<String>) -> bool {
        self.handle_message(&Message::new(MessageType::Error, text, detail))
    }

    /// Send a warning
    pub fn send_warning(&self, text: impl Into<String>, detail: impl Into<String>) -> bool {
        self.handle_message(&Message::new(MessageType::Warning, text, detail))
    }

    /// Send an informational message
    pub fn send_info(&self, text: impl Into<String>, detail: impl Into<String>) -> bool {
        self.handle_message(&Message::new(MessageType::Info, text, detail))
    }

    /// Send output text
    pub fn send_output(&self, text: impl Into<String>) -> bool {
        self.handle_message(&Message::new(MessageType::Output, text, ""))
    }

    /// Send a verbose message; dropped unless verbose is on
    pub fn send_verbose(&self, text: impl Into<String>) -> bool {
        if !self.verbose() {
            return false;
        }
        self.handle_message(&Message::new(MessageType::Verbose, text, ""))
    }

    /// Send progress; `fraction` is relative to the innermost progress step
    ///
    /// Negative fractions mean indeterminate progress and are passed through.
    pub fn send_progress(&self, fraction: f32, text: impl Into<String>, detail: impl Into<String>) -> bool {
        let mut msg = Message::new(MessageType::Progress, text, detail);
        msg.progress = self.scale_progress(fraction);
        self.handle_message(&msg)
    }

    // ========================================================================
    // Progress steps
    // ========================================================================

    /// Enter a sub-task covering `from..to` of the enclosing range
    pub fn begin_progress_step(&self, from: f32, to: f32) {
        self.progress_steps.lock().push((from, to));
    }

    /// Leave the innermost sub-task
    pub fn end_progress_step(&self) {
        if self.progress_steps.lock().pop().is_none() {
            tracing::warn!("end_progress_step() without matching begin");
        }
    }

    /// Drop all progress steps
    pub fn reset_progress_steps(&self) {
        self.progress_steps.lock().clear();
    }

    /// Map a sub-task fraction to the overall fraction
    pub fn scale_progress(&self, fraction: f32) -> f32 {
        if fraction < 0.0 {
            return fraction;
        }
        self.progress_steps
            .lock()
            .iter()
            .rev()
            .fold(fraction, |p, &(from, to)| from + (to - from) * p)
    }

    // ========================================================================
    // Status queries
    // ========================================================================

    /// Push a cancellation query
    pub fn push_status_query_handler<F>(&self, handler: F)
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.status_handlers.lock().push(Arc::new(handler));
    }

    /// Pop the newest cancellation query
    pub fn pop_status_query_handler(&self) {
        self.status_handlers.lock().pop();
    }

    /// True when the newest query handler asks for cancellation
    pub fn query_status(&self) -> bool {
        let top = self.status_handlers.lock().last().cloned();
        top.map_or(false, |handler| handler())
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(false)
    }
}

impl fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBus")
            .field("handlers", &self.handler_count())
            .field("verbose", &self.verbose())
            .finish()
    }
}

fn log_unhandled(msg: &Message) {
    match msg.kind {
        MessageType::Error => tracing::error!(detail = %msg.detail, "{}", msg.text),
        MessageType::Warning => tracing::warn!(detail = %msg.detail, "{}", msg.text),
        MessageType::Info | MessageType::Output => tracing::info!(detail = %msg.detail, "{}", msg.text),
        MessageType::Verbose | MessageType::Control => tracing::debug!("{}", msg.text),
        MessageType::Progress => {
            if !msg.text.is_empty() {
                tracing::trace!(progress = msg.progress, "{}", msg.text);
            }
        }
    }
}
