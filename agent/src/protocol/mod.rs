pub mod methods;

pub use earnwatch_core::protocol::{errors, messages};
