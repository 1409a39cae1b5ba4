use anyhow::Context;
use clap::Parser;
use env_logger::Env;
use error_alert::alerts::ObserverRegistry;
use error_alert::collectors::{AlertLogger, ErrorSink};
use error_alert::commands::{CommandContext, CommandHandler, COMMAND_NAME};
use error_alert::config::{BotKind, Config};
use error_alert::error::ConfigError;
use error_alert::scheduler::TokioScheduler;
use error_alert::storage::JsonFileStore;
use error_alert::subscriptions::{SubscriptionManager, SubscriptionStore};
use error_alert::transport::{Bot, BotRegistry, ConsoleBot, Target, WebhookBot};
use log::{error, info, warn, LevelFilter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::runtime::Handle;
use tokio::sync::mpsc;

/// Command-line arguments for the error alert service
#[derive(Parser)]
#[command(
    name = "error-alert",
    about = "Error alert service - routes captured runtime errors to subscribed chat sessions",
    long_about = "Captures error-level events from the running service, turns them into alerts \
                  and delivers them to subscribed sessions, either immediately or as cron-scheduled \
                  digests. Commands are read from stdin as \
                  `<bot_id> <session> <user_id> error_alert ...`."
)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Configuration file path (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, help = "Enable verbose logging output (debug level)")]
    verbose: bool,
}

impl Cli {
    /// Validate the CLI arguments
    ///
    /// # Returns
    ///
    /// `Ok(())` if all arguments are valid, `Err(String)` with error message otherwise
    fn validate(&self) -> Result<(), String> {
        if let Some(ref config_path) = self.config {
            // Missing files fall back to defaults in load_config
            if config_path.exists() && !config_path.is_file() {
                return Err(format!(
                    "Configuration path is not a file: {}",
                    config_path.display()
                ));
            }
        }
        Ok(())
    }
}

/// Main application struct wiring the alert pipeline together
///
/// Owns the observer registry, scheduler, connected bots and subscription
/// manager for the lifetime of the process.
pub struct AlertService {
    sink: Arc<ErrorSink>,
    bots: Arc<BotRegistry>,
    scheduler: Arc<TokioScheduler>,
    manager: Arc<SubscriptionManager>,
    commands: CommandHandler,
}

impl AlertService {
    /// Create the service and connect the configured bots
    ///
    /// # Arguments
    ///
    /// * `config` - Application configuration
    /// * `sink` - Error sink the installed logger feeds
    /// * `registry` - Observer registry the sink dispatches to
    /// * `runtime` - Runtime for timers and background sends
    ///
    /// # Errors
    ///
    /// Fails if the data directory cannot be created or a bot cannot be built.
    pub fn new(
        config: Config,
        sink: Arc<ErrorSink>,
        registry: Arc<ObserverRegistry>,
        runtime: Handle,
    ) -> anyhow::Result<Self> {
        info!("Initializing alert service");

        let data = JsonFileStore::open(&config.data_dir).with_context(|| {
            format!("Failed to open data directory {}", config.data_dir.display())
        })?;
        info!("Persisting subscriptions to {}", data.path().display());

        let bots = Arc::new(BotRegistry::new());
        for bot in &config.bots {
            let connected: Arc<dyn Bot> = match bot.kind {
                BotKind::Webhook => Arc::new(
                    WebhookBot::new(
                        bot.id.clone(),
                        bot.url.clone().unwrap_or_default(),
                        bot.aggregated,
                    )
                    .with_context(|| format!("Failed to create webhook bot {}", bot.id))?,
                ),
                BotKind::Console => Arc::new(ConsoleBot::new(bot.id.clone())),
            };
            bots.connect(connected);
        }

        let scheduler = Arc::new(TokioScheduler::new(runtime.clone()));
        let manager = Arc::new(SubscriptionManager::new(
            SubscriptionStore::new(Arc::new(data)),
            registry,
            scheduler.clone(),
            Arc::clone(&bots),
            runtime,
            config.aggregate_chunk_size,
        ));
        let commands = CommandHandler::new(Arc::clone(&manager), Arc::new(config));

        Ok(Self {
            sink,
            bots,
            scheduler,
            manager,
            commands,
        })
    }

    /// Load configuration from file or use defaults
    ///
    /// A missing or unreadable file yields `ConfigError::ReadError`, which the
    /// caller treats as "use defaults".
    fn load_config(config_path: Option<&Path>) -> Result<Config, ConfigError> {
        match config_path {
            Some(path) => Config::from_file(path),
            None => Ok(Config::default()),
        }
    }

    /// Re-arm persisted subscriptions
    pub async fn start(&self) -> anyhow::Result<()> {
        let restored = self
            .manager
            .restore_on_startup()
            .await
            .context("Failed to restore subscriptions")?;
        info!("Alert service started with {} subscription(s)", restored);
        Ok(())
    }

    /// Handle one stdin line of the form `<bot_id> <session> <user_id> <text>`
    ///
    /// # Returns
    ///
    /// The reply to print, if the line produced one
    pub async fn handle_line(&self, line: &str) -> Option<String> {
        let mut parts = line.trim().splitn(4, char::is_whitespace);
        let (Some(bot_id), Some(session), Some(user_id), Some(text)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            if !line.trim().is_empty() {
                warn!("Ignoring malformed input line: {}", line.trim());
            }
            return None;
        };
        let text = text.trim();

        match text {
            "!raise" => {
                let event = format!("message from {} in {}: {}", user_id, session, text);
                if let Err(e) = "forty-two".parse::<i32>() {
                    self.sink.report(&e, Some(&event));
                }
                None
            }
            "!error" => {
                error!(target: "demo", "Demo error requested by {} in {}", user_id, session);
                None
            }
            _ if text.split_whitespace().next() == Some(COMMAND_NAME) => {
                let context = CommandContext {
                    bot_id: bot_id.to_string(),
                    session: session.to_string(),
                    target: self.session_target(bot_id, session),
                    user_id: user_id.to_string(),
                };
                Some(self.commands.handle(&context, text).await)
            }
            _ => None,
        }
    }

    /// Stop every cron job and observer
    pub async fn shutdown(&self) {
        info!("Shutting down alert service");
        self.manager.shutdown().await;
        self.scheduler.shutdown();
        log::logger().flush();
    }

    fn session_target(&self, bot_id: &str, session: &str) -> Target {
        let platform = self
            .bots
            .get(bot_id)
            .map(|bot| bot.platform().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        Target::new(platform).with("session", session)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let cli = Cli::parse();

    // Config is read before the logger exists because the sink needs its
    // plugin filter; the outcome is logged right after installation.
    let loaded = AlertService::load_config(cli.config.as_deref());
    let config = loaded.as_ref().cloned().unwrap_or_default();

    let registry = Arc::new(ObserverRegistry::new());
    let sink = Arc::new(ErrorSink::new(Arc::clone(&registry), config.plugin_filter()));

    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or("info"));
    if cli.verbose {
        builder.filter_level(LevelFilter::Debug);
    }
    AlertLogger::new(builder.build(), Arc::clone(&sink))
        .install()
        .context("Failed to install logger")?;

    info!("Starting error alert service");

    if let Err(e) = cli.validate() {
        error!("Invalid arguments: {}", e);
        std::process::exit(1);
    }

    match loaded {
        Ok(_) => {
            if let Some(ref path) = cli.config {
                info!("Loaded configuration from {}", path.display());
            }
        }
        Err(ConfigError::ReadError(e)) => {
            warn!("Configuration file not found or unreadable ({}), using defaults", e);
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    }

    let service = AlertService::new(config, sink, registry, Handle::current())?;
    service.start().await?;

    // Set up signal handling for graceful shutdown (SIGINT)
    let (shutdown_sender, mut shutdown_receiver) = mpsc::unbounded_channel();
    ctrlc::set_handler(move || {
        info!("Received interrupt signal (SIGINT), shutting down gracefully...");
        if let Err(e) = shutdown_sender.send(()) {
            error!("Failed to send shutdown signal: {}", e);
        }
    })
    .context("Error setting SIGINT handler for graceful shutdown")?;

    info!("Error alert service is running. Press Ctrl+C or close stdin to stop.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if let Some(reply) = service.handle_line(&line).await {
                        println!("{}", reply);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!("Failed to read stdin: {}", e);
                    break;
                }
            },
            _ = shutdown_receiver.recv() => break,
        }
    }

    service.shutdown().await;
    info!("Error alert service stopped");

    // A pending stdin read would otherwise keep the runtime from shutting down
    std::process::exit(0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use error_alert::alerts::{ErrorAlert, Observer};
    use error_alert::collectors::PluginFilter;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingObserver {
        received: Mutex<Vec<ErrorAlert>>,
    }

    impl Observer for RecordingObserver {
        fn receive(&self, alert: &ErrorAlert) {
            self.received.lock().unwrap().push(alert.clone());
        }
    }

    fn build_service(dir: &TempDir, superuser_only: bool) -> (AlertService, Arc<ObserverRegistry>) {
        let config = Config::from_toml_str(&format!(
            "error_alert_superuser_only = {}\nsuperusers = [\"alice\"]\ndata_dir = {:?}\n\
             [[bots]]\nid = \"local\"\nkind = \"console\"\n",
            superuser_only,
            dir.path().display().to_string()
        ))
        .unwrap();
        let registry = Arc::new(ObserverRegistry::new());
        let sink = Arc::new(ErrorSink::new(Arc::clone(&registry), PluginFilter::All));
        let service =
            AlertService::new(config, sink, Arc::clone(&registry), Handle::current()).unwrap();
        (service, registry)
    }

    #[test]
    fn test_cli_validation_with_existing_file() {
        let dir = TempDir::new().unwrap();
        let config_file = dir.path().join("error-alert.toml");
        std::fs::write(&config_file, "superusers = [\"alice\"]").unwrap();

        let cli = Cli {
            config: Some(config_file),
            verbose: false,
        };

        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_cli_validation_with_missing_file() {
        let cli = Cli {
            config: Some(PathBuf::from("/nonexistent/config.toml")),
            verbose: false,
        };

        // Should not fail - missing files are handled gracefully
        assert!(cli.validate().is_ok());
        assert!(matches!(
            AlertService::load_config(cli.config.as_deref()),
            Err(ConfigError::ReadError(_))
        ));
    }

    #[test]
    fn test_cli_validation_with_directory() {
        let dir = TempDir::new().unwrap();
        let cli = Cli {
            config: Some(dir.path().to_path_buf()),
            verbose: false,
        };

        // Should fail - directories are not valid config files
        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_cli_parse_flags() {
        let cli = Cli::try_parse_from(["error-alert", "--config", "alert.toml", "-v"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("alert.toml")));
        assert!(cli.verbose);
    }

    #[tokio::test]
    async fn test_command_lines() {
        let dir = TempDir::new().unwrap();
        let (service, registry) = build_service(&dir, true);

        assert_eq!(
            service
                .handle_line("local ops bob error_alert subscribe")
                .await
                .as_deref(),
            Some("permission denied")
        );
        assert_eq!(
            service
                .handle_line("local ops alice error_alert subscribe --cron 0 0 9 * * *")
                .await
                .as_deref(),
            Some("ok")
        );
        assert_eq!(
            service
                .handle_line("local ops alice error_alert show")
                .await
                .as_deref(),
            Some("type: scheduled\ncron: 0 0 9 * * *")
        );
        assert_eq!(registry.keys(), vec!["subscribe_5:local_ops".to_string()]);

        assert_eq!(service.handle_line("local ops alice hello there").await, None);
        assert_eq!(service.handle_line("garbage").await, None);

        service.shutdown().await;
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_raise_reports_through_sink() {
        let dir = TempDir::new().unwrap();
        let (service, registry) = build_service(&dir, false);
        let observer = Arc::new(RecordingObserver::default());
        registry.add("recorder", observer.clone()).unwrap();

        service.handle_line("local ops bob !raise").await;

        let received = observer.received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(
            received[0].exception_type.as_deref(),
            Some("core::num::error::ParseIntError")
        );
        assert!(received[0]
            .summary
            .contains("Event: message from bob in ops: !raise"));
    }

    #[tokio::test]
    async fn test_restore_after_restart() {
        let dir = TempDir::new().unwrap();
        {
            let (service, _) = build_service(&dir, false);
            service
                .handle_line("local ops bob error_alert subscribe")
                .await;
            service.shutdown().await;
        }

        let (service, registry) = build_service(&dir, false);
        service.start().await.unwrap();
        assert_eq!(registry.keys(), vec!["subscribe_5:local_ops".to_string()]);
        service.shutdown().await;
    }
}
