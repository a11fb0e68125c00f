pub mod capability;
pub mod cli;
pub mod config;
pub mod model;
pub mod resolver;
pub mod scheduler;
pub mod store;

mod api;
mod flock;

pub use api::{Error, Repobuild, RepobuildBuilder};
