pub mod config;
pub mod errors;
pub mod events;
pub mod protocol;
pub mod snapshot;
pub mod source;
pub mod store;
