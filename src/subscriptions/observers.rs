//! Delivery strategies
//!
//! Both observers resolve their bot through the [`BotRegistry`] at send time
//! and never propagate a delivery failure: failed sends are logged and
//! dropped (at-most-once delivery).

use crate::alerts::{ErrorAlert, Observer};
use crate::error::{CronError, DeliveryError, SchedulerError, SubscriptionError};
use crate::events::Timestamp;
use crate::scheduler::{CronTrigger, Job, JobFuture, JobScheduler};
use crate::subscriptions::{Subscription, SubscriptionType};
use crate::transport::{BotRegistry, Message};
use chrono::Local;
use log::{debug, error, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;

/// Groups listed in a digest before it is truncated
pub const MAX_DIGEST_GROUPS: usize = 10;

/// Default number of messages per aggregated batch
pub const DEFAULT_CHUNK_SIZE: usize = 50;

/// Label for alerts that carry no exception
const NON_EXCEPTION_LABEL: &str = "non-exception";

/// Sends every alert to the subscriber as soon as it is received
pub struct ImmediateObserver {
    subscription: Subscription,
    bots: Arc<BotRegistry>,
    runtime: Handle,
}

impl ImmediateObserver {
    /// Create an immediate observer
    ///
    /// # Arguments
    ///
    /// * `subscription` - The subscription this observer delivers for
    /// * `bots` - Connected bots, resolved per send
    /// * `runtime` - Runtime the detached send tasks are spawned on
    pub fn new(subscription: Subscription, bots: Arc<BotRegistry>, runtime: Handle) -> Self {
        Self {
            subscription,
            bots,
            runtime,
        }
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }
}

impl Observer for ImmediateObserver {
    fn receive(&self, alert: &ErrorAlert) {
        let bots = Arc::clone(&self.bots);
        let bot_id = self.subscription.bot_id.clone();
        let target = self.subscription.target.clone();
        let message = Message::text(alert.summary.clone());

        // Detached: the logging call site must not wait on the network
        self.runtime.spawn(async move {
            let result = match bots.resolve(&bot_id) {
                Ok(bot) => bot.send(&target, message).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                error!("Failed to deliver alert via bot {} to {}: {}", bot_id, target, e);
            }
        });
    }
}

/// Buffers alerts and delivers them as a digest on a cron schedule
///
/// The scheduler owns the timer; the registered job only holds a weak
/// reference back to the observer, so dropping the observer also ends its
/// effect even if the job was never removed.
pub struct CronObserver {
    subscription: Subscription,
    trigger: CronTrigger,
    bots: Arc<BotRegistry>,
    scheduler: Arc<dyn JobScheduler>,
    chunk_size: usize,
    pending: Mutex<Vec<ErrorAlert>>,
    last_flush: Mutex<Timestamp>,
}

impl CronObserver {
    /// Create a cron observer for a scheduled subscription
    ///
    /// # Errors
    ///
    /// Returns `CronError::InvalidCronExpression` if the subscription carries
    /// no cron expression or the expression does not parse.
    pub fn new(
        subscription: Subscription,
        bots: Arc<BotRegistry>,
        scheduler: Arc<dyn JobScheduler>,
        chunk_size: usize,
    ) -> Result<Arc<Self>, CronError> {
        let expression = subscription.cron_expression().ok_or_else(|| {
            CronError::InvalidCronExpression(format!(
                "subscription {} has no cron expression",
                subscription.key()
            ))
        })?;
        let trigger = CronTrigger::parse(expression)?;

        Ok(Arc::new(Self {
            subscription,
            trigger,
            bots,
            scheduler,
            chunk_size: chunk_size.max(1),
            pending: Mutex::new(Vec::new()),
            last_flush: Mutex::new(Local::now()),
        }))
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    pub fn trigger(&self) -> &CronTrigger {
        &self.trigger
    }

    /// Number of alerts waiting for the next flush
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Register the recurring flush with the scheduler
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::DuplicateJob` if a job with this
    /// subscription's key is already scheduled.
    pub fn start(self: &Arc<Self>) -> Result<(), SchedulerError> {
        let observer = Arc::downgrade(self);
        let job: Job = Arc::new(move || -> JobFuture {
            let observer = observer.clone();
            Box::pin(async move {
                if let Some(observer) = observer.upgrade() {
                    observer.flush().await;
                }
            })
        });
        self.scheduler
            .add_job(&self.subscription.key(), self.trigger.clone(), job)
    }

    /// Drain the pending buffer and deliver it
    ///
    /// Does nothing when no alert arrived since the last flush. Alerts
    /// received while a flush is running land in the next one.
    pub async fn flush(&self) {
        let batch = std::mem::take(&mut *self.pending.lock().unwrap_or_else(|e| e.into_inner()));
        if batch.is_empty() {
            return;
        }

        let bot = match self.bots.resolve(&self.subscription.bot_id) {
            Ok(bot) => bot,
            Err(e) => {
                warn!(
                    "Dropping {} pending alert(s) for {}: {}",
                    batch.len(),
                    self.subscription.key(),
                    e
                );
                return;
            }
        };

        let now = Local::now();
        let since = std::mem::replace(
            &mut *self.last_flush.lock().unwrap_or_else(|e| e.into_inner()),
            now,
        );

        let mut messages = Vec::with_capacity(batch.len() + 1);
        messages.push(Message::text(build_digest(&batch, &since)));
        messages.extend(batch.into_iter().map(|alert| Message::text(alert.summary)));

        debug!(
            "Flushing {} message(s) for {} via {}",
            messages.len(),
            self.subscription.key(),
            bot.platform()
        );

        let target = &self.subscription.target;
        if bot.supports_aggregated() {
            for chunk in messages.chunks(self.chunk_size) {
                if let Err(e) = bot.send_aggregated(target, chunk.to_vec()).await {
                    self.log_send_failure(&e);
                }
            }
        } else {
            for message in messages {
                if let Err(e) = bot.send(target, message).await {
                    self.log_send_failure(&e);
                }
            }
        }
    }

    fn log_send_failure(&self, e: &DeliveryError) {
        error!(
            "Failed to deliver digest for {} to {}: {}",
            self.subscription.key(),
            self.subscription.target,
            e
        );
    }
}

impl Observer for CronObserver {
    fn receive(&self, alert: &ErrorAlert) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(alert.clone());
    }

    fn stop(&self) {
        match self.scheduler.remove_job(&self.subscription.key()) {
            Ok(()) | Err(SchedulerError::JobNotFound(_)) => {}
            Err(e) => warn!("Failed to stop job {}: {}", self.subscription.key(), e),
        }
    }
}

/// Build the observer a subscription asks for and arm it
///
/// # Errors
///
/// Returns an error if the cron expression is invalid or the job cannot be
/// scheduled.
pub fn build_observer(
    subscription: Subscription,
    bots: Arc<BotRegistry>,
    scheduler: Arc<dyn JobScheduler>,
    runtime: Handle,
    chunk_size: usize,
) -> Result<Arc<dyn Observer>, SubscriptionError> {
    match subscription.subscription_type {
        SubscriptionType::Immediate => {
            Ok(Arc::new(ImmediateObserver::new(subscription, bots, runtime)))
        }
        SubscriptionType::Cron => {
            let observer = CronObserver::new(subscription, bots, scheduler, chunk_size)?;
            observer.start()?;
            Ok(observer)
        }
    }
}

/// Render the digest heading a flush
///
/// Alerts are grouped by exception type and listed largest group first;
/// equally sized groups keep the order their first alert arrived in.
pub fn build_digest(alerts: &[ErrorAlert], since: &Timestamp) -> String {
    let mut groups: Vec<(&str, usize)> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    for alert in alerts {
        let label = alert
            .exception_type
            .as_deref()
            .unwrap_or(NON_EXCEPTION_LABEL);
        match index.get(label) {
            Some(&i) => groups[i].1 += 1,
            None => {
                index.insert(label, groups.len());
                groups.push((label, 1));
            }
        }
    }
    groups.sort_by(|a, b| b.1.cmp(&a.1));

    let mut lines = vec![format!(
        "{} to now: {} new errors",
        since.format("%Y-%m-%d %H:%M"),
        alerts.len()
    )];
    for (label, count) in groups.iter().take(MAX_DIGEST_GROUPS) {
        lines.push(format!("<{}> {} times", label, count));
    }
    if groups.len() > MAX_DIGEST_GROUPS {
        lines.push("...".to_string());
    }
    lines.join("\n")
}
