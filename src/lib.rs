// #![deny(warnings)]

#[macro_use]
mod util;
pub use util::named;

pub mod cast;
pub mod client;
pub mod codec;
pub mod error;
pub mod message;
pub mod payload;
pub mod status;
pub mod types;

pub use error::{Error, Result};
