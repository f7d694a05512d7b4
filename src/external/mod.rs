pub mod eligibility;
pub mod notifier;

pub use eligibility::*;
pub use notifier::*;
