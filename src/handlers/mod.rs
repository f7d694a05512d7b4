pub mod giveaway;
pub mod webhook;

pub use giveaway::giveaway_config;
pub use webhook::webhook_config;
