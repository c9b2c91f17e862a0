//! Request handlers.

pub mod health;
pub mod info;
pub mod process;

pub use health::*;
pub use info::*;
pub use process::*;
