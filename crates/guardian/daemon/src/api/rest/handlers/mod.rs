//! API request handlers

mod audit;
mod health;
mod overrides;
mod status;

pub use audit::*;
pub use health::*;
pub use overrides::*;
pub use status::*;
