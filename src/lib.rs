/// Error types for the alert pipeline
pub mod error;

/// Raw error records captured from the running service
pub mod events;

/// Alert building and observer dispatch
pub mod alerts;

/// Log sink feeding error records into the pipeline
pub mod collectors;

/// Cron triggers and job scheduling
pub mod scheduler;

/// Outbound message delivery
pub mod transport;

/// Plugin key/value data store
pub mod storage;

/// Subscriptions and their delivery strategies
pub mod subscriptions;

/// The `error_alert` command surface
pub mod commands;

/// Configuration management
pub mod config;

// Re-export commonly used types
pub use alerts::{AlertBuilder, ErrorAlert, Observer, ObserverRegistry};
pub use collectors::{AlertLogger, ErrorSink};
pub use config::Config;
pub use error::{
    CommandError, ConfigError, CronError, DeliveryError, RegistryError, SchedulerError,
    StoreError, SubscriptionError,
};
pub use subscriptions::{Subscription, SubscriptionManager, SubscriptionType};
