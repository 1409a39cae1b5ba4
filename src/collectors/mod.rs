/// Log sink turning error records into dispatched alerts
pub mod log_sink;

pub use log_sink::{AlertLogger, ErrorSink, PluginFilter};
