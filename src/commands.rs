//! The `error_alert` command
//!
//! ```text
//! error_alert show
//! error_alert subscribe [--cron <expr>]
//! error_alert unsubscribe
//! ```

use crate::config::Config;
use crate::error::{CommandError, SubscriptionError};
use crate::subscriptions::SubscriptionManager;
use crate::transport::Target;
use clap::{Parser, Subcommand};
use log::error;
use std::sync::Arc;

/// Name the command is invoked by
pub const COMMAND_NAME: &str = "error_alert";

const NOT_SUBSCRIBED: &str = "not subscribed";

#[derive(Parser, Debug)]
#[command(name = COMMAND_NAME, about = "Manage error alert subscriptions for this session")]
struct CommandLine {
    #[command(subcommand)]
    action: Action,
}

/// Parsed `error_alert` action
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Show this session's subscription
    Show,
    /// Subscribe this session to error alerts
    Subscribe {
        /// Six-field cron expression; alerts are batched into a digest sent on
        /// this schedule instead of immediately
        #[arg(long, value_name = "EXPR", num_args = 1..)]
        cron: Option<Vec<String>>,
    },
    /// Stop sending error alerts to this session
    Unsubscribe,
}

impl Action {
    /// Parse a full command line, starting with the command name
    ///
    /// # Errors
    ///
    /// Returns `CommandError::Usage` with clap's usage or help text.
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        CommandLine::try_parse_from(line.split_whitespace())
            .map(|command| command.action)
            .map_err(|e| CommandError::Usage(e.render().to_string().trim_end().to_string()))
    }

    /// Cron expression given to `subscribe`, with surrounding quotes removed
    pub fn cron_expression(&self) -> Option<String> {
        match self {
            Action::Subscribe { cron: Some(words) } => {
                let joined = words.join(" ");
                let unquoted = joined
                    .strip_prefix('"')
                    .and_then(|s| s.strip_suffix('"'))
                    .or_else(|| joined.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
                    .unwrap_or(&joined);
                Some(unquoted.trim().to_string())
            }
            _ => None,
        }
    }
}

/// Who invoked a command, and from where
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandContext {
    pub bot_id: String,
    pub session: String,
    /// Where alerts for this session are delivered
    pub target: Target,
    pub user_id: String,
}

/// Executes `error_alert` commands against the subscription manager
pub struct CommandHandler {
    manager: Arc<SubscriptionManager>,
    config: Arc<Config>,
}

impl CommandHandler {
    pub fn new(manager: Arc<SubscriptionManager>, config: Arc<Config>) -> Self {
        Self { manager, config }
    }

    /// Run a command line and return the reply text
    ///
    /// Failures are rendered as the reply; nothing is propagated.
    pub async fn handle(&self, context: &CommandContext, line: &str) -> String {
        match self.execute(context, line).await {
            Ok(reply) => reply,
            Err(CommandError::Subscription(e)) if !matches!(e, SubscriptionError::InvalidCron(_)) => {
                error!("error_alert command failed for {}: {}", context.session, e);
                e.to_string()
            }
            Err(e) => e.to_string(),
        }
    }

    /// Run a command line
    ///
    /// # Errors
    ///
    /// Returns `CommandError::PermissionDenied` when the caller is not
    /// allowed to manage subscriptions, `CommandError::Usage` for malformed
    /// input, and `CommandError::Subscription` when the manager fails.
    pub async fn execute(&self, context: &CommandContext, line: &str) -> Result<String, CommandError> {
        if !self.config.is_permitted(&context.user_id) {
            return Err(CommandError::PermissionDenied);
        }

        let action = Action::parse(line)?;
        match action {
            Action::Show => {
                let current = self.manager.show(&context.bot_id, &context.session)?;
                Ok(current
                    .map(|s| s.describe())
                    .unwrap_or_else(|| NOT_SUBSCRIBED.to_string()))
            }
            Action::Subscribe { .. } => {
                let cron = action.cron_expression();
                self.manager
                    .subscribe(
                        &context.bot_id,
                        &context.session,
                        context.target.clone(),
                        cron.as_deref(),
                    )
                    .await?;
                Ok("ok".to_string())
            }
            Action::Unsubscribe => {
                self.manager
                    .unsubscribe(&context.bot_id, &context.session)
                    .await?;
                Ok("ok".to_string())
            }
        }
    }
}
