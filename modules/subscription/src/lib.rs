//! `subscription` module: plans users subscribe to.
//!
//! Owns the `UserSubscription` type and, once every module is loaded, links
//! it with `User` in both directions (`User.subscriptions`,
//! `UserSubscription.user`).

pub mod config;
pub mod module;

pub use config::SubscriptionConfig;
pub use module::{build, MODEL, MODULE_ID, TYPE_NAME};

gqlkit::register_module!("subscription", deps = ["user"], crate::module::build);
