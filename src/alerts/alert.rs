use crate::events::ErrorRecord;

/// Structured alert derived from one captured error event
///
/// Alerts are immutable once built. Observers receive them by reference and
/// clone them only when they need to hold on to one (the cron pending buffer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorAlert {
    /// Full human-readable description of the error
    pub summary: String,
    /// Type name of the attached error; `None` for plain error-level log lines
    pub exception_type: Option<String>,
}

/// Converts raw error records into alerts
///
/// Formatting is best-effort: any field missing from the record is simply
/// left out of the summary. The builder never filters records; keeping the
/// alert pipeline's own records out is the log sink's job.
pub struct AlertBuilder;

impl AlertBuilder {
    /// Convert a raw error record into an alert
    ///
    /// # Arguments
    ///
    /// * `record` - The captured error record
    ///
    /// # Returns
    ///
    /// The alert with its summary text and exception type tag
    pub fn convert(record: &ErrorRecord) -> ErrorAlert {
        let mut summary = String::new();

        if let Some(ref message) = record.message {
            if !message.is_empty() {
                summary.push_str(message);
                summary.push('\n');
            }
        }

        summary.push('\n');

        summary.push_str(&format!(
            "Time: {}\n",
            record.time.format("%Y-%m-%d %H:%M:%S")
        ));
        summary.push_str(&format!("Logged at: {}\n", Self::call_site(record)));

        if let Some(ref exception) = record.exception {
            summary.push_str(&format!(
                "Exception: <{}> {}\n",
                exception.type_name, exception.message
            ));

            if let Some(deepest) = exception.frames.last() {
                summary.push_str(&format!(
                    "Raised at: File {}, line {}, in {}\n",
                    deepest.file, deepest.line, deepest.function
                ));
                if let Some(ref source) = deepest.source_line {
                    summary.push_str(&format!("    {}\n", source.trim()));
                }
            }

            let plugins = exception.plugin_chain();
            if !plugins.is_empty() {
                summary.push_str(&format!("Plugins: {}\n", plugins.join("->")));
            }

            if let Some(ref event) = record.event {
                summary.push_str(&format!("Event: {}\n", event));
            }
        }

        if !record.thread.is_main() {
            summary.push_str(&format!(
                "Thread: {} (tid: {})\n",
                record.thread.name, record.thread.id
            ));
        }

        if let Some(ref process) = record.process {
            summary.push_str(&format!("Process: {} (pid: {})\n", process.name, process.id));
        }

        ErrorAlert {
            summary: summary.trim().to_string(),
            exception_type: record.exception.as_ref().map(|e| e.type_name.clone()),
        }
    }

    /// Render the logging call site, omitting whatever the record lacks
    fn call_site(record: &ErrorRecord) -> String {
        let mut parts = Vec::with_capacity(3);
        if let Some(ref file) = record.file {
            parts.push(format!("File {}", file));
        }
        if let Some(line) = record.line {
            parts.push(format!("line {}", line));
        }
        let scope = record.function.as_deref().unwrap_or(&record.module);
        if !scope.is_empty() {
            parts.push(format!("in {}", scope));
        }
        parts.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ExceptionInfo, Frame, ProcessInfo, ThreadInfo};
    use chrono::{Local, TimeZone};

    fn create_test_record() -> ErrorRecord {
        ErrorRecord {
            message: Some("Failed to handle command".to_string()),
            time: Local.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap(),
            file: Some("src/plugins/weather.rs".to_string()),
            line: Some(42),
            function: Some("handle_weather".to_string()),
            module: "bot::plugins::weather".to_string(),
            exception: None,
            event: None,
            thread: ThreadInfo {
                name: "main".to_string(),
                id: "ThreadId(1)".to_string(),
            },
            process: None,
        }
    }

    fn create_test_exception() -> ExceptionInfo {
        ExceptionInfo {
            type_name: "std::io::Error".to_string(),
            message: "connection reset".to_string(),
            frames: vec![
                Frame {
                    file: "src/dispatch.rs".to_string(),
                    line: 10,
                    function: "dispatch".to_string(),
                    source_line: Some("handler.run(event)?;".to_string()),
                    plugin: Some("router".to_string()),
                },
                Frame {
                    file: "src/plugins/weather.rs".to_string(),
                    line: 77,
                    function: "fetch_forecast".to_string(),
                    source_line: Some("    let body = client.get(url).send()?;".to_string()),
                    plugin: Some("weather".to_string()),
                },
            ],
        }
    }

    #[test]
    fn test_convert_plain_error_line() {
        let alert = AlertBuilder::convert(&create_test_record());

        assert_eq!(alert.exception_type, None);
        assert!(alert.summary.starts_with("Failed to handle command\n\nTime: 2024-03-01 12:30:05"));
        assert!(alert
            .summary
            .contains("Logged at: File src/plugins/weather.rs, line 42, in handle_weather"));
        assert!(!alert.summary.to_lowercase().contains("exception:"));
        assert!(!alert.summary.contains("Thread:"));
        assert!(!alert.summary.contains("Process:"));
    }

    #[test]
    fn test_convert_with_exception() {
        let mut record = create_test_record();
        record.exception = Some(create_test_exception());
        record.event = Some("Message from user 42 in group 7: /weather".to_string());

        let alert = AlertBuilder::convert(&record);

        assert_eq!(alert.exception_type.as_deref(), Some("std::io::Error"));
        assert!(alert.summary.contains("Exception: <std::io::Error> connection reset"));
        assert!(alert
            .summary
            .contains("Raised at: File src/plugins/weather.rs, line 77, in fetch_forecast"));
        assert!(alert.summary.contains("\n    let body = client.get(url).send()?;\n"));
        assert!(alert.summary.contains("Plugins: router->weather"));
        assert!(alert
            .summary
            .contains("Event: Message from user 42 in group 7: /weather"));
    }

    #[test]
    fn test_convert_section_order() {
        let mut record = create_test_record();
        record.exception = Some(create_test_exception());
        record.event = Some("event".to_string());
        record.thread = ThreadInfo {
            name: "worker".to_string(),
            id: "ThreadId(7)".to_string(),
        };
        record.process = Some(ProcessInfo {
            name: "renderer".to_string(),
            id: 4242,
        });

        let summary = AlertBuilder::convert(&record).summary;
        let order = [
            "Failed to handle command",
            "Time:",
            "Logged at:",
            "Exception:",
            "Raised at:",
            "Plugins:",
            "Event:",
            "Thread: worker (tid: ThreadId(7))",
            "Process: renderer (pid: 4242)",
        ];
        let positions: Vec<usize> = order
            .iter()
            .map(|needle| summary.find(needle).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_convert_without_message_or_location() {
        let mut record = create_test_record();
        record.message = None;
        record.file = None;
        record.line = None;
        record.function = None;

        let alert = AlertBuilder::convert(&record);

        assert!(alert.summary.starts_with("Time: "));
        assert!(alert.summary.contains("Logged at: in bot::plugins::weather"));
    }

    #[test]
    fn test_convert_exception_without_frames() {
        let mut record = create_test_record();
        record.exception = Some(ExceptionInfo {
            type_name: "anyhow::Error".to_string(),
            message: "boom".to_string(),
            frames: vec![],
        });

        let alert = AlertBuilder::convert(&record);

        assert!(alert.summary.contains("Exception: <anyhow::Error> boom"));
        assert!(!alert.summary.contains("Raised at:"));
        assert!(!alert.summary.contains("Plugins:"));
    }
}
