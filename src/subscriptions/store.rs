use crate::error::StoreError;
use crate::storage::DataStore;
use crate::subscriptions::Subscription;
use log::debug;
use std::sync::{Arc, Mutex};

/// Data store key holding the subscription list
pub const SUBSCRIBE_KEY: &str = "subscribe";

/// CRUD over the persisted subscription list
///
/// The whole list lives under one data store key and is rewritten on every
/// mutation. Each operation is atomic with respect to the others on the same
/// store; callers that pair a mutation with other state changes must still
/// hold their own lock around both.
pub struct SubscriptionStore {
    data: Arc<dyn DataStore>,
    lock: Mutex<()>,
}

impl SubscriptionStore {
    pub fn new(data: Arc<dyn DataStore>) -> Self {
        Self {
            data,
            lock: Mutex::new(()),
        }
    }

    /// All subscriptions in insertion order
    pub fn list(&self) -> Result<Vec<Subscription>, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.load()
    }

    pub fn find(&self, bot_id: &str, session: &str) -> Result<Option<Subscription>, StoreError> {
        Ok(self
            .list()?
            .into_iter()
            .find(|s| s.is_for(bot_id, session)))
    }

    /// Insert or replace the subscription for its `(bot_id, session)`
    ///
    /// A replaced record keeps its position in the list.
    ///
    /// # Returns
    ///
    /// The record that was replaced, if any
    pub fn upsert(&self, subscription: Subscription) -> Result<Option<Subscription>, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut subscriptions = self.load()?;

        let position = subscriptions
            .iter()
            .position(|s| s.is_for(&subscription.bot_id, &subscription.session));
        let replaced = match position {
            Some(index) => Some(std::mem::replace(&mut subscriptions[index], subscription)),
            None => {
                subscriptions.push(subscription);
                None
            }
        };

        self.save(&subscriptions)?;
        Ok(replaced)
    }

    /// Remove the subscription for `(bot_id, session)`
    ///
    /// Nothing is written when no record matches.
    pub fn delete(&self, bot_id: &str, session: &str) -> Result<Option<Subscription>, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut subscriptions = self.load()?;

        let Some(index) = subscriptions.iter().position(|s| s.is_for(bot_id, session)) else {
            return Ok(None);
        };
        let removed = subscriptions.remove(index);

        self.save(&subscriptions)?;
        Ok(Some(removed))
    }

    fn load(&self) -> Result<Vec<Subscription>, StoreError> {
        match self.data.get(SUBSCRIBE_KEY)? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(Vec::new()),
        }
    }

    fn save(&self, subscriptions: &[Subscription]) -> Result<(), StoreError> {
        debug!("Persisting {} subscription(s)", subscriptions.len());
        self.data
            .set(SUBSCRIBE_KEY, serde_json::to_value(subscriptions)?)
    }
}
