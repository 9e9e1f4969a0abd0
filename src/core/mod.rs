//! Core types, collaborator traits, configuration and errors.

mod config;
pub mod constants;
mod error;
mod media;
mod traits;
mod types;

pub use config::*;
pub use error::*;
pub use media::*;
pub use traits::*;
pub use types::*;
