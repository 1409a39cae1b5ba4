use crate::alerts::ObserverRegistry;
use crate::error::{RegistryError, SubscriptionError};
use crate::scheduler::{CronTrigger, JobScheduler};
use crate::subscriptions::observers::build_observer;
use crate::subscriptions::{Subscription, SubscriptionStore};
use crate::transport::{BotRegistry, Target};
use log::{error, info, warn};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Mutex;

/// Keeps persisted subscriptions and live observers in step
///
/// Every mutation holds one lock across the store write and the registry
/// change, so the registry always holds exactly one observer per stored
/// subscription.
pub struct SubscriptionManager {
    store: SubscriptionStore,
    registry: Arc<ObserverRegistry>,
    scheduler: Arc<dyn JobScheduler>,
    bots: Arc<BotRegistry>,
    runtime: Handle,
    chunk_size: usize,
    lock: Mutex<()>,
}

impl SubscriptionManager {
    /// Create a subscription manager
    ///
    /// # Arguments
    ///
    /// * `store` - Persisted subscriptions
    /// * `registry` - Registry the observers are added to
    /// * `scheduler` - Scheduler running cron flushes
    /// * `bots` - Connected bots
    /// * `runtime` - Runtime immediate sends are spawned on
    /// * `chunk_size` - Messages per aggregated batch on flush
    pub fn new(
        store: SubscriptionStore,
        registry: Arc<ObserverRegistry>,
        scheduler: Arc<dyn JobScheduler>,
        bots: Arc<BotRegistry>,
        runtime: Handle,
        chunk_size: usize,
    ) -> Self {
        Self {
            store,
            registry,
            scheduler,
            bots,
            runtime,
            chunk_size,
            lock: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &Arc<ObserverRegistry> {
        &self.registry
    }

    /// Subscribe a session, replacing any existing subscription
    ///
    /// Without `cron` every alert is delivered immediately; with it alerts
    /// are buffered and delivered as a digest whenever the expression fires.
    ///
    /// # Errors
    ///
    /// Returns `SubscriptionError::InvalidCron` if `cron` is not a valid
    /// six-field expression (nothing is changed), or a store / scheduler
    /// error if persisting or arming the observer fails.
    pub async fn subscribe(
        &self,
        bot_id: &str,
        session: &str,
        target: Target,
        cron: Option<&str>,
    ) -> Result<Subscription, SubscriptionError> {
        let subscription = match cron {
            Some(expression) => {
                CronTrigger::parse(expression)?;
                Subscription::cron(bot_id, session, target, expression)
            }
            None => Subscription::immediate(bot_id, session, target),
        };

        let _guard = self.lock.lock().await;
        let key = subscription.key();

        self.store.upsert(subscription.clone())?;
        self.detach(&key);
        self.attach(subscription.clone())?;

        info!("Subscribed {} ({})", key, subscription.subscription_type);
        Ok(subscription)
    }

    /// Remove a session's subscription
    ///
    /// Unsubscribing a session that has no subscription is a no-op.
    ///
    /// # Returns
    ///
    /// The removed subscription, if there was one
    pub async fn unsubscribe(
        &self,
        bot_id: &str,
        session: &str,
    ) -> Result<Option<Subscription>, SubscriptionError> {
        let _guard = self.lock.lock().await;

        let removed = self.store.delete(bot_id, session)?;
        if let Some(ref subscription) = removed {
            self.detach(&subscription.key());
            info!("Unsubscribed {}", subscription.key());
        }
        Ok(removed)
    }

    /// Current subscription of a session
    pub fn show(
        &self,
        bot_id: &str,
        session: &str,
    ) -> Result<Option<Subscription>, SubscriptionError> {
        Ok(self.store.find(bot_id, session)?)
    }

    /// Re-arm an observer for every persisted subscription
    ///
    /// The store is not written. A subscription whose observer cannot be
    /// built (e.g. a hand-edited, invalid cron expression) is logged and
    /// skipped.
    ///
    /// # Returns
    ///
    /// The number of observers restored
    pub async fn restore_on_startup(&self) -> Result<usize, SubscriptionError> {
        let _guard = self.lock.lock().await;

        let mut restored = 0;
        for subscription in self.store.list()? {
            let key = subscription.key();
            match self.attach(subscription) {
                Ok(()) => restored += 1,
                Err(e) => error!("Failed to restore subscription {}: {}", key, e),
            }
        }
        info!("Restored {} subscription(s)", restored);
        Ok(restored)
    }

    /// Stop every observer and its scheduled job
    pub async fn shutdown(&self) {
        let _guard = self.lock.lock().await;
        self.registry.shutdown();
        info!("Subscription manager stopped");
    }

    fn attach(&self, subscription: Subscription) -> Result<(), SubscriptionError> {
        let key = subscription.key();
        let observer = build_observer(
            subscription,
            Arc::clone(&self.bots),
            Arc::clone(&self.scheduler),
            self.runtime.clone(),
            self.chunk_size,
        )?;
        if let Err(e) = self.registry.add(&key, Arc::clone(&observer)) {
            observer.stop();
            return Err(e.into());
        }
        Ok(())
    }

    fn detach(&self, key: &str) {
        match self.registry.remove(key) {
            Ok(observer) => observer.stop(),
            Err(RegistryError::NotFound(_)) => {}
            Err(e) => warn!("Failed to remove observer {}: {}", key, e),
        }
    }
}
