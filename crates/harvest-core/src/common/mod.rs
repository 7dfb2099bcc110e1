pub mod error;
pub mod events;
pub mod geo;
pub mod ids;
pub mod types;

pub use error::*;
