//! `habit` module: recurring habits tracked per user.

pub mod config;
pub mod module;

pub use config::{Frequency, HabitConfig};
pub use module::{build, MODEL, MODULE_ID, TYPE_NAME};

gqlkit::register_module!("habit", deps = ["user"], crate::module::build);
