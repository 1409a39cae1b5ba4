//! Alert subscriptions
//!
//! A subscription binds a chat session to a delivery strategy. The
//! [`SubscriptionManager`] persists subscriptions through the
//! [`SubscriptionStore`] and keeps one live observer registered per record.

pub mod manager;
pub mod model;
pub mod observers;
pub mod store;

pub use manager::SubscriptionManager;
pub use model::{subscription_key, Subscription, SubscriptionType};
pub use observers::{build_digest, CronObserver, ImmediateObserver};
pub use store::SubscriptionStore;
