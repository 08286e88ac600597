//! # RelayStore
//!
//! `relaystore` is a durable store-and-forward message queue for edge
//! gateways. Local applications hand it outbound messages at any rate; a
//! publisher loop drains them towards an intermittently connected upstream
//! broker in priority/age order, tracking each one through
//! unpublished → published → confirmed (or dropped).
//!
//! ## Core Modules
//!
//! - `persistence`: record model and the `sled`-backed table with its
//!   dispatch and delivery-state indexes.
//! - `store`: the message store engine, capacity eviction, the provider that
//!   keeps one live store per name, and the periodic housekeeper.
//! - `config`: loading settings from files and environment variables.
//! - `utils`: error taxonomy and logging setup.

pub mod config;
pub mod persistence;
pub mod store;
pub mod utils;

pub use persistence::{DeliveryState, DeliveryToken, MessageId, Qos, StoredMessage};
pub use store::{Housekeeper, MessageStore, StoreProvider, Transition};
pub use utils::{Result, StoreError};
