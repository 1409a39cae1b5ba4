//! Raw error records captured from the running service
//!
//! This module defines the structures the log sink hands to the alert builder.
//! Everything the alert summary mentions must be attached here explicitly by
//! the capture site: there is no frame introspection after the fact.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;

/// Timestamp type for consistent time handling across the application
pub type Timestamp = DateTime<Local>;

/// Name the Rust runtime gives the main thread
pub const MAIN_THREAD_NAME: &str = "main";

/// A single error-level event as seen by the log sink
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorRecord {
    /// The formatted log message, if any
    pub message: Option<String>,
    /// When the record was created
    pub time: Timestamp,
    /// Source file of the logging call site
    pub file: Option<String>,
    /// Line of the logging call site
    pub line: Option<u32>,
    /// Function (or module path, when the function is unknown) of the call site
    pub function: Option<String>,
    /// Module path / log target that produced the record
    pub module: String,
    /// Attached error, when the record reports a failure value
    pub exception: Option<ExceptionInfo>,
    /// Description of the event that was being handled when the error occurred
    pub event: Option<String>,
    /// Thread the record was produced on
    pub thread: ThreadInfo,
    /// Worker process the record came from; `None` means the main process
    pub process: Option<ProcessInfo>,
}

/// An error value attached to a record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExceptionInfo {
    /// Qualified type name of the error
    pub type_name: String,
    /// Display text of the error, including its source chain
    pub message: String,
    /// Call frames, outermost first
    pub frames: Vec<Frame>,
}

/// One call frame of an attached error
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Frame {
    pub file: String,
    pub line: u32,
    pub function: String,
    /// Source text of the line, when known
    pub source_line: Option<String>,
    /// Plugin (component) owning this frame, when known
    pub plugin: Option<String>,
}

/// Thread identity captured at the logging call site
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThreadInfo {
    pub name: String,
    pub id: String,
}

/// Worker process identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessInfo {
    pub name: String,
    pub id: u32,
}

/// The triggering event attached to an error report
///
/// Implemented by whatever the service was handling when the error occurred
/// (an incoming message, a scheduled job, ...).
pub trait EventContext {
    /// Human-readable, single-line description of the event
    fn describe(&self) -> String;
}

impl EventContext for String {
    fn describe(&self) -> String {
        self.clone()
    }
}

impl ThreadInfo {
    /// Capture the identity of the calling thread
    pub fn current() -> Self {
        let thread = std::thread::current();
        Self {
            name: thread.name().unwrap_or("<unnamed>").to_string(),
            id: format!("{:?}", thread.id()),
        }
    }

    pub fn is_main(&self) -> bool {
        self.name == MAIN_THREAD_NAME
    }
}

impl ExceptionInfo {
    /// Build exception info from an error value
    ///
    /// The type name is the fully qualified Rust type; the message is the
    /// error's display text followed by every `source()` in the chain.
    pub fn from_error<E: StdError + ?Sized>(error: &E) -> Self {
        let mut message = error.to_string();
        let mut source = error.source();
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }

        Self {
            type_name: std::any::type_name::<E>().to_string(),
            message,
            frames: Vec::new(),
        }
    }

    /// Append a call frame (frames are kept outermost first)
    pub fn with_frame(mut self, frame: Frame) -> Self {
        self.frames.push(frame);
        self
    }

    /// Ordered chain of distinct plugins the frames walk through
    ///
    /// Consecutive frames owned by the same plugin collapse into one entry.
    pub fn plugin_chain(&self) -> Vec<&str> {
        let mut chain: Vec<&str> = Vec::new();
        for plugin in self.frames.iter().filter_map(|f| f.plugin.as_deref()) {
            if chain.last() != Some(&plugin) {
                chain.push(plugin);
            }
        }
        chain
    }
}

impl ErrorRecord {
    /// Create a record for the calling thread at the current time
    pub fn new(module: impl Into<String>, message: Option<String>) -> Self {
        Self {
            message,
            time: Local::now(),
            file: None,
            line: None,
            function: None,
            module: module.into(),
            exception: None,
            event: None,
            thread: ThreadInfo::current(),
            process: None,
        }
    }
}
