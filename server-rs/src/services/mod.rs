pub mod catalogue;
pub mod challenge_engine;
pub mod challenges;
pub mod expiry;
pub mod notifier;
pub mod points;
pub mod progress_tracker;
pub mod rewards;
pub mod slug;
