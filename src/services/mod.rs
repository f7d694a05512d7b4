pub mod entry_tracker;
pub mod giveaway_coordinator;
pub mod giveaway_scheduler;
pub mod giveaway_service;
pub mod giveaway_store;
pub mod winner_selector;

pub use entry_tracker::*;
pub use giveaway_coordinator::*;
pub use giveaway_scheduler::*;
pub use giveaway_service::*;
pub use giveaway_store::*;
pub use winner_selector::*;
