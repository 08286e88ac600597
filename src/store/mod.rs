pub mod engine;
pub mod eviction;
pub mod housekeeper;
pub mod provider;

pub use engine::{MessageCounts, MessageStore, Transition};
pub use housekeeper::Housekeeper;
pub use provider::StoreProvider;
