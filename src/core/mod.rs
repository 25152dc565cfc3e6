//! packetline - Core traits, types, and constants.
//!
//! This module holds the contract shared by every transport role. It has no
//! I/O of its own.

mod constants;
mod error;
mod traits;

pub use constants::*;
pub use error::*;
pub use traits::*;
