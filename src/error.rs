use thiserror::Error;

/// Errors raised by the observer registry
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// An observer is already registered under this key. Subscriptions and
    /// observers are kept 1:1, so hitting this is an internal invariant violation.
    #[error("Observer already registered: {0}")]
    DuplicateKey(String),

    #[error("No observer registered for key: {0}")]
    NotFound(String),
}

/// Errors that can occur while parsing a cron expression
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CronError {
    #[error("Invalid cron expression: {0}")]
    InvalidCronExpression(String),
}

/// Errors reported by the job scheduler adapter
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Job already scheduled: {0}")]
    DuplicateJob(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error(transparent)]
    InvalidCron(#[from] CronError),
}

/// Errors that can occur when reading or writing persisted plugin data
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt data store: {0}")]
    Corrupt(String),
}

/// Errors that can occur when delivering a message to a recipient
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Bot {0} is not connected")]
    UnresolvedTarget(String),

    #[error("Failed to send message: {0}")]
    SendFailed(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Errors surfaced by subscribe / unsubscribe / restore
#[derive(Error, Debug)]
pub enum SubscriptionError {
    #[error(transparent)]
    InvalidCron(#[from] CronError),

    #[error("Subscription store error: {0}")]
    Store(#[from] StoreError),

    #[error("Observer registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

/// Errors returned by the `error_alert` command surface
#[derive(Error, Debug)]
pub enum CommandError {
    /// Parser usage or error text, replied verbatim
    #[error("{0}")]
    Usage(String),

    #[error("permission denied")]
    PermissionDenied,

    #[error(transparent)]
    Subscription(#[from] SubscriptionError),
}

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}
