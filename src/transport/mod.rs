//! Outbound message delivery
//!
//! A [`Bot`] is a connected account on some chat platform that can send text
//! to a [`Target`]. Bots are looked up by id in the [`BotRegistry`] at send
//! time, so a subscription survives its bot disconnecting and reconnecting.

/// Webhook and console bot implementations
pub mod bots;

pub use bots::{ConsoleBot, WebhookBot};

use crate::error::DeliveryError;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

/// Future returned by every send primitive
pub type SendFuture = Pin<Box<dyn Future<Output = Result<(), DeliveryError>> + Send>>;

/// Opaque recipient descriptor
///
/// Serialised flat, e.g. `{"platform_type": "QQ Group", "group_id": 123}`.
/// Only the bot that delivers to it interprets the address fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Target {
    pub platform_type: String,
    #[serde(flatten)]
    pub address: BTreeMap<String, serde_json::Value>,
}

/// A single outbound text message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub text: String,
}

/// Per-platform send primitive
#[cfg_attr(test, mockall::automock)]
pub trait Bot: Send + Sync {
    /// Account id the bot is registered under
    fn id(&self) -> &str;

    /// Platform / protocol name
    fn platform(&self) -> &str;

    /// Whether the protocol can deliver several messages as one aggregated batch
    fn supports_aggregated(&self) -> bool;

    /// Send one message
    fn send(&self, target: &Target, message: Message) -> SendFuture;

    /// Send several messages as one aggregated batch
    ///
    /// Defaults to sending them one by one, stopping at the first failure.
    fn send_aggregated(&self, target: &Target, messages: Vec<Message>) -> SendFuture {
        let sends: Vec<SendFuture> = messages
            .into_iter()
            .map(|message| self.send(target, message))
            .collect();
        Box::pin(async move {
            for send in sends {
                send.await?;
            }
            Ok(())
        })
    }
}

impl Target {
    pub fn new(platform_type: impl Into<String>) -> Self {
        Self {
            platform_type: platform_type.into(),
            address: BTreeMap::new(),
        }
    }

    /// Add an address field
    pub fn with(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.address.insert(key.to_string(), value.into());
        self
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.platform_type)?;
        if !self.address.is_empty() {
            let fields: Vec<String> = self
                .address
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            write!(f, "({})", fields.join(", "))?;
        }
        Ok(())
    }
}

impl Message {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Currently connected bots, keyed by id
#[derive(Default)]
pub struct BotRegistry {
    bots: RwLock<HashMap<String, Arc<dyn Bot>>>,
}

impl BotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connected bot, replacing any previous connection with the same id
    pub fn connect(&self, bot: Arc<dyn Bot>) {
        info!("Bot {} connected ({})", bot.id(), bot.platform());
        self.bots
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(bot.id().to_string(), bot);
    }

    pub fn disconnect(&self, bot_id: &str) -> Option<Arc<dyn Bot>> {
        let removed = self
            .bots
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(bot_id);
        if removed.is_some() {
            info!("Bot {} disconnected", bot_id);
        }
        removed
    }

    pub fn get(&self, bot_id: &str) -> Option<Arc<dyn Bot>> {
        self.bots
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(bot_id)
            .cloned()
    }

    /// Look up a bot for delivery
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::UnresolvedTarget` if the bot is not connected.
    pub fn resolve(&self, bot_id: &str) -> Result<Arc<dyn Bot>, DeliveryError> {
        self.get(bot_id)
            .ok_or_else(|| DeliveryError::UnresolvedTarget(bot_id.to_string()))
    }
}

/// Test doubles shared by the delivery tests
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// What a [`RecordingBot`] was asked to deliver
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Delivery {
        Single(Target, String),
        Aggregated(Target, Vec<String>),
    }

    /// Bot that records deliveries instead of sending them
    pub struct RecordingBot {
        id: String,
        aggregated: bool,
        fail: bool,
        pub deliveries: Arc<Mutex<Vec<Delivery>>>,
    }

    impl RecordingBot {
        pub fn new(id: &str) -> Arc<Self> {
            Self::build(id, false, false)
        }

        pub fn aggregated(id: &str) -> Arc<Self> {
            Self::build(id, true, false)
        }

        pub fn failing(id: &str) -> Arc<Self> {
            Self::build(id, false, true)
        }

        fn build(id: &str, aggregated: bool, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                aggregated,
                fail,
                deliveries: Arc::new(Mutex::new(Vec::new())),
            })
        }

        pub fn deliveries(&self) -> Vec<Delivery> {
            self.deliveries.lock().unwrap().clone()
        }

        fn record(&self, delivery: Delivery) -> SendFuture {
            self.deliveries.lock().unwrap().push(delivery);
            let fail = self.fail;
            Box::pin(async move {
                if fail {
                    Err(DeliveryError::SendFailed("recording bot set to fail".to_string()))
                } else {
                    Ok(())
                }
            })
        }
    }

    impl Bot for RecordingBot {
        fn id(&self) -> &str {
            &self.id
        }

        fn platform(&self) -> &str {
            if self.aggregated {
                "OneBot V11"
            } else {
                "test"
            }
        }

        fn supports_aggregated(&self) -> bool {
            self.aggregated
        }

        fn send(&self, target: &Target, message: Message) -> SendFuture {
            self.record(Delivery::Single(target.clone(), message.text))
        }

        fn send_aggregated(&self, target: &Target, messages: Vec<Message>) -> SendFuture {
            let texts = messages.into_iter().map(|m| m.text).collect();
            self.record(Delivery::Aggregated(target.clone(), texts))
        }
    }
}
