pub mod common;
pub mod giveaway;

pub use common::*;
pub use giveaway::*;
