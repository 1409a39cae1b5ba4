use crate::alerts::{AlertBuilder, ObserverRegistry};
use crate::events::{ErrorRecord, EventContext, ExceptionInfo};
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use std::cell::Cell;
use std::error::Error as StdError;
use std::panic::Location;
use std::sync::Arc;

/// Log target prefix of this crate; records under it never become alerts
pub const SELF_TARGET: &str = "error_alert";

thread_local! {
    static DISPATCHING: Cell<bool> = const { Cell::new(false) };
}

/// Which plugins' errors are turned into alerts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PluginFilter {
    /// Every plugin
    #[default]
    All,
    /// Only errors whose plugin chain includes one of these
    Allow(Vec<String>),
    /// Errors whose plugin chain includes one of these are dropped
    Deny(Vec<String>),
}

impl PluginFilter {
    /// Build a filter from the optional allow / deny lists
    ///
    /// An allow list takes precedence; configuration validation rejects
    /// setting both.
    pub fn from_lists(allow: Option<Vec<String>>, deny: Option<Vec<String>>) -> Self {
        match (allow, deny) {
            (Some(allow), _) => PluginFilter::Allow(allow),
            (None, Some(deny)) => PluginFilter::Deny(deny),
            (None, None) => PluginFilter::All,
        }
    }

    /// Whether a record passes the filter
    ///
    /// Records without a plugin chain always pass.
    pub fn admits(&self, record: &ErrorRecord) -> bool {
        let chain = match record.exception {
            Some(ref exception) => exception.plugin_chain(),
            None => Vec::new(),
        };
        if chain.is_empty() {
            return true;
        }

        match self {
            PluginFilter::All => true,
            PluginFilter::Allow(allowed) => chain.iter().any(|p| allowed.iter().any(|a| a == p)),
            PluginFilter::Deny(denied) => !chain.iter().any(|p| denied.iter().any(|d| d == p)),
        }
    }
}

/// Entry point of the alert pipeline
///
/// Turns error records into alerts and dispatches them to every registered
/// observer. Records raised by the pipeline itself, and records produced
/// while an alert is being dispatched on the same thread, are dropped.
pub struct ErrorSink {
    registry: Arc<ObserverRegistry>,
    filter: PluginFilter,
}

impl ErrorSink {
    pub fn new(registry: Arc<ObserverRegistry>, filter: PluginFilter) -> Self {
        Self { registry, filter }
    }

    /// Report an error caught by the caller
    ///
    /// The call site is recorded as the logging location. `event` describes
    /// whatever the code was handling when the error occurred.
    ///
    /// # Arguments
    ///
    /// * `error` - The error to report
    /// * `event` - The triggering event, if any
    #[track_caller]
    pub fn report<E: StdError + ?Sized>(&self, error: &E, event: Option<&dyn EventContext>) {
        let location = Location::caller();
        let mut record = ErrorRecord::new("", None);
        record.file = Some(location.file().to_string());
        record.line = Some(location.line());
        record.exception = Some(ExceptionInfo::from_error(error));
        record.event = event.map(|e| e.describe());
        self.submit(record);
    }

    /// Convert and dispatch a fully built record
    ///
    /// # Returns
    ///
    /// `true` if the record was dispatched
    pub fn submit(&self, record: ErrorRecord) -> bool {
        if is_own_target(&record.module) || !self.filter.admits(&record) {
            return false;
        }

        let Some(_guard) = DispatchGuard::enter() else {
            return false;
        };
        let alert = AlertBuilder::convert(&record);
        self.registry.dispatch(&alert);
        true
    }
}

/// Marks the current thread as dispatching until dropped
struct DispatchGuard;

impl DispatchGuard {
    fn enter() -> Option<Self> {
        DISPATCHING.with(|flag| {
            if flag.get() {
                None
            } else {
                flag.set(true);
                Some(DispatchGuard)
            }
        })
    }
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        DISPATCHING.with(|flag| flag.set(false));
    }
}

fn is_own_target(target: &str) -> bool {
    target == SELF_TARGET || target.starts_with("error_alert::")
}

/// Logger writing through `env_logger` and feeding error records to the sink
pub struct AlertLogger {
    inner: env_logger::Logger,
    sink: Arc<ErrorSink>,
}

impl AlertLogger {
    pub fn new(inner: env_logger::Logger, sink: Arc<ErrorSink>) -> Self {
        Self { inner, sink }
    }

    /// Install as the global logger
    ///
    /// The maximum level is raised to at least `Error` so error records
    /// reach the sink even when console output is filtered out.
    ///
    /// # Errors
    ///
    /// Returns `SetLoggerError` if a global logger is already installed.
    pub fn install(self) -> Result<(), SetLoggerError> {
        let max_level = self.inner.filter().max(LevelFilter::Error);
        log::set_boxed_logger(Box::new(self))?;
        log::set_max_level(max_level);
        Ok(())
    }

    fn to_error_record(record: &Record) -> ErrorRecord {
        let mut error_record =
            ErrorRecord::new(record.target(), Some(record.args().to_string()));
        error_record.file = record.file().map(str::to_string);
        error_record.line = record.line();
        error_record
    }
}

impl Log for AlertLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() == Level::Error || self.inner.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if self.inner.matches(record) {
            self.inner.log(record);
        }
        if record.level() == Level::Error && !is_own_target(record.target()) {
            self.sink.submit(Self::to_error_record(record));
        }
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{ErrorAlert, Observer};
    use crate::events::Frame;
    use std::sync::{Mutex, OnceLock};

    #[derive(Default)]
    struct RecordingObserver {
        received: Mutex<Vec<ErrorAlert>>,
    }

    impl Observer for RecordingObserver {
        fn receive(&self, alert: &ErrorAlert) {
            self.received.lock().unwrap().push(alert.clone());
        }
    }

    impl RecordingObserver {
        fn summaries(&self) -> Vec<String> {
            self.received
                .lock()
                .unwrap()
                .iter()
                .map(|a| a.summary.clone())
                .collect()
        }
    }

    fn sink_with(filter: PluginFilter) -> (Arc<ErrorSink>, Arc<RecordingObserver>) {
        let registry = Arc::new(ObserverRegistry::new());
        let observer = Arc::new(RecordingObserver::default());
        registry.add("recorder", observer.clone()).unwrap();
        (Arc::new(ErrorSink::new(registry, filter)), observer)
    }

    fn record_from_plugins(plugins: &[&str]) -> ErrorRecord {
        let mut exception = ExceptionInfo {
            type_name: "PluginError".to_string(),
            message: "failed".to_string(),
            frames: Vec::new(),
        };
        for (i, plugin) in plugins.iter().enumerate() {
            exception = exception.with_frame(Frame {
                file: format!("src/{}.rs", plugin),
                line: i as u32 + 1,
                function: "handle".to_string(),
                source_line: None,
                plugin: Some(plugin.to_string()),
            });
        }
        let mut record = ErrorRecord::new("bot::dispatch", None);
        record.exception = Some(exception);
        record
    }

    fn quiet_logger(sink: Arc<ErrorSink>) -> AlertLogger {
        let inner = env_logger::Builder::new()
            .filter_level(LevelFilter::Off)
            .build();
        AlertLogger::new(inner, sink)
    }

    #[test]
    fn test_logger_forwards_foreign_errors_only() {
        let (sink, observer) = sink_with(PluginFilter::All);
        let logger = quiet_logger(sink);

        logger.log(
            &Record::builder()
                .level(Level::Error)
                .target("weather")
                .file(Some("src/weather.rs"))
                .line(Some(12))
                .args(format_args!("upstream timed out"))
                .build(),
        );
        logger.log(
            &Record::builder()
                .level(Level::Warn)
                .target("weather")
                .args(format_args!("slow response"))
                .build(),
        );
        logger.log(
            &Record::builder()
                .level(Level::Error)
                .target("error_alert::subscriptions::observers")
                .args(format_args!("Failed to deliver"))
                .build(),
        );

        let summaries = observer.summaries();
        assert_eq!(summaries.len(), 1);
        assert!(summaries[0].starts_with("upstream timed out"));
        assert!(summaries[0].contains("Logged at: File src/weather.rs, line 12, in weather"));
    }

    #[test]
    fn test_logger_enabled_for_errors_when_output_is_off() {
        let (sink, _) = sink_with(PluginFilter::All);
        let logger = quiet_logger(sink);

        let error = Metadata::builder().level(Level::Error).target("x").build();
        let info = Metadata::builder().level(Level::Info).target("x").build();
        assert!(logger.enabled(&error));
        assert!(!logger.enabled(&info));
    }

    #[test]
    fn test_report_records_call_site_and_event() {
        let (sink, observer) = sink_with(PluginFilter::All);
        let error = std::io::Error::new(std::io::ErrorKind::TimedOut, "weather api");
        let event = "message from user 42: /weather".to_string();

        sink.report(&error, Some(&event));

        let received = observer.received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(
            received[0].exception_type.as_deref(),
            Some("std::io::error::Error")
        );
        let logged_at = format!("Logged at: File {}, line ", file!());
        let line = received[0]
            .summary
            .lines()
            .find(|l| l.starts_with(&logged_at))
            .unwrap();
        assert!(!line.contains(" in "), "{}", line);
        assert!(received[0]
            .summary
            .contains("Event: message from user 42: /weather"));
    }

    #[test]
    fn test_own_module_records_are_excluded() {
        let (sink, observer) = sink_with(PluginFilter::All);
        assert!(!sink.submit(ErrorRecord::new("error_alert::commands", None)));
        assert!(!sink.submit(ErrorRecord::new("error_alert", None)));
        assert!(sink.submit(ErrorRecord::new("error_alerting_plugin", None)));
        assert_eq!(observer.summaries().len(), 1);
    }

    #[test]
    fn test_plugin_allowlist() {
        let filter = PluginFilter::from_lists(Some(vec!["weather".to_string()]), None);
        assert!(filter.admits(&record_from_plugins(&["router", "weather"])));
        assert!(!filter.admits(&record_from_plugins(&["router", "music"])));
        assert!(filter.admits(&record_from_plugins(&[])));
        assert!(filter.admits(&ErrorRecord::new("bot", Some("plain".to_string()))));
    }

    #[test]
    fn test_plugin_denylist() {
        let filter = PluginFilter::from_lists(None, Some(vec!["noisy".to_string()]));
        assert!(!filter.admits(&record_from_plugins(&["router", "noisy"])));
        assert!(filter.admits(&record_from_plugins(&["router", "weather"])));
        assert_eq!(PluginFilter::from_lists(None, None), PluginFilter::All);
    }

    /// Observer that reports another error while receiving one
    struct ReentrantObserver {
        sink: OnceLock<Arc<ErrorSink>>,
        calls: Mutex<usize>,
    }

    impl Observer for ReentrantObserver {
        fn receive(&self, _alert: &ErrorAlert) {
            *self.calls.lock().unwrap() += 1;
            if let Some(sink) = self.sink.get() {
                assert!(!sink.submit(ErrorRecord::new("weather", Some("nested".to_string()))));
            }
        }
    }

    #[test]
    fn test_reentrant_dispatch_is_dropped() {
        let registry = Arc::new(ObserverRegistry::new());
        let observer = Arc::new(ReentrantObserver {
            sink: OnceLock::new(),
            calls: Mutex::new(0),
        });
        registry.add("reentrant", observer.clone()).unwrap();
        let sink = Arc::new(ErrorSink::new(registry, PluginFilter::All));
        let _ = observer.sink.set(Arc::clone(&sink));

        assert!(sink.submit(ErrorRecord::new("weather", Some("outer".to_string()))));
        assert_eq!(*observer.calls.lock().unwrap(), 1);

        // Guard released after dispatch
        assert!(sink.submit(ErrorRecord::new("weather", Some("again".to_string()))));
        assert_eq!(*observer.calls.lock().unwrap(), 2);
    }
}
