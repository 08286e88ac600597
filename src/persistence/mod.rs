//! The `persistence` module holds the durable side of the message store.
//!
//! Records are kept in `sled`, an embedded crash-safe key-value store. The
//! table keeps a dispatch index over `(priority, created_on, id)` and an
//! index over delivery state next to the rows themselves.

pub mod keys;
pub mod record;
pub mod sled_store;

pub use record::{DeliveryState, DeliveryToken, MessageId, Qos, StateTag, StoredMessage};
pub use sled_store::{Change, Table};
