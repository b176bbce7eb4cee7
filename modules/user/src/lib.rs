//! `user` module: the `User` type, its model and the root fields to read
//! and create users. Other modules attach relations to `User`.

pub mod config;
pub mod module;

pub use config::{SeedUser, UserConfig};
pub use module::{build, MODEL, MODULE_ID, TYPE_NAME};

gqlkit::register_module!("user", crate::module::build);
