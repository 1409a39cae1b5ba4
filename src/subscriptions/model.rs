use crate::transport::Target;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// `extra` entry holding the cron expression of a scheduled subscription
pub const CRON_KEY: &str = "cron";

/// Delivery strategy of a subscription
///
/// Persisted as an integer tag: `0` immediate, `1` cron.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(into = "u8", try_from = "u8")]
pub enum SubscriptionType {
    Immediate,
    Cron,
}

impl From<SubscriptionType> for u8 {
    fn from(kind: SubscriptionType) -> Self {
        match kind {
            SubscriptionType::Immediate => 0,
            SubscriptionType::Cron => 1,
        }
    }
}

impl TryFrom<u8> for SubscriptionType {
    type Error = String;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(SubscriptionType::Immediate),
            1 => Ok(SubscriptionType::Cron),
            other => Err(format!("unknown subscription type {}", other)),
        }
    }
}

impl fmt::Display for SubscriptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionType::Immediate => write!(f, "immediate"),
            SubscriptionType::Cron => write!(f, "scheduled"),
        }
    }
}

/// A session's standing request to receive alerts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subscription {
    pub bot_id: String,
    pub session: String,
    pub target: Target,
    #[serde(rename = "type")]
    pub subscription_type: SubscriptionType,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl Subscription {
    /// Subscription delivering every alert as soon as it is captured
    pub fn immediate(bot_id: &str, session: &str, target: Target) -> Self {
        Self {
            bot_id: bot_id.to_string(),
            session: session.to_string(),
            target,
            subscription_type: SubscriptionType::Immediate,
            extra: BTreeMap::new(),
        }
    }

    /// Subscription delivering a digest whenever `cron` fires
    ///
    /// The expression is stored as given; validation happens when the
    /// observer is built.
    pub fn cron(bot_id: &str, session: &str, target: Target, cron: &str) -> Self {
        let mut extra = BTreeMap::new();
        extra.insert(CRON_KEY.to_string(), cron.to_string());
        Self {
            bot_id: bot_id.to_string(),
            session: session.to_string(),
            target,
            subscription_type: SubscriptionType::Cron,
            extra,
        }
    }

    /// Registry and scheduler key, unique per `(bot_id, session)`
    pub fn key(&self) -> String {
        subscription_key(&self.bot_id, &self.session)
    }

    /// Cron expression of a scheduled subscription
    pub fn cron_expression(&self) -> Option<&str> {
        self.extra.get(CRON_KEY).map(String::as_str)
    }

    /// Whether this record belongs to the given session
    pub fn is_for(&self, bot_id: &str, session: &str) -> bool {
        self.bot_id == bot_id && self.session == session
    }

    /// Human-readable state, as replied to `show`
    pub fn describe(&self) -> String {
        match self.subscription_type {
            SubscriptionType::Immediate => format!("type: {}", self.subscription_type),
            SubscriptionType::Cron => format!(
                "type: {}\ncron: {}",
                self.subscription_type,
                self.cron_expression().unwrap_or_default()
            ),
        }
    }
}

/// Key of a `(bot_id, session)` pair
///
/// The bot id is length-prefixed so ids and sessions containing `_` never
/// collide: `("bot_a", "x")` and `("bot", "a_x")` get different keys.
pub fn subscription_key(bot_id: &str, session: &str) -> String {
    format!("subscribe_{}:{}_{}", bot_id.len(), bot_id, session)
}
