//! Message store engine
//!
//! `MessageStore` is the public face of one named queue:
//! - producers call [`MessageStore::store`] from any thread
//! - a publisher loop pulls [`MessageStore::get_next_message`] and reports
//!   the outcome through the `mark_as_*` transitions
//! - the housekeeper reclaims completed records with
//!   [`MessageStore::delete_stale_messages`]
//!
//! Concurrency notes:
//! - All operations run under one mutex around the table. Select-then-mark
//!   sequences and bulk updates are therefore atomic with respect to each
//!   other, and the table's sled transactions make them atomic on disk.
//! - Selection never changes state. A failed send is retried by asking for
//!   the next message again.
//! - Nothing here waits on the network.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use tracing::{debug, info, warn};

use super::eviction::{self, Eviction};
use crate::persistence::{
    Change, DeliveryState, DeliveryToken, MessageId, Qos, StateTag, StoredMessage, Table,
};
use crate::utils::{Result, StoreError};

/// Outcome of a single-record lifecycle transition.
///
/// Neither `Missing` nor `Rejected` is an error: the record may have been
/// purged or evicted concurrently, and a publisher loop must not crash on
/// such a race.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    /// No record with this id.
    Missing,
    /// The record's current state does not allow the transition.
    Rejected,
}

impl Transition {
    pub fn is_applied(self) -> bool {
        self == Transition::Applied
    }
}

/// Number of records per delivery state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageCounts {
    pub unpublished: usize,
    pub in_flight: usize,
    pub published: usize,
    pub confirmed: usize,
    pub dropped: usize,
}

impl MessageCounts {
    pub fn total(&self) -> usize {
        self.unpublished + self.in_flight + self.published + self.confirmed + self.dropped
    }
}

pub struct MessageStore {
    name: String,
    capacity: usize,
    table: Mutex<Option<Table>>,
}

/// Wall clock at the precision rows are persisted with.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

impl MessageStore {
    /// Wrap an opened table. Stores are normally obtained through
    /// [`StoreProvider`](super::StoreProvider), which guarantees a single
    /// live instance per name.
    pub fn new(name: &str, capacity: usize, table: Table) -> Result<Self> {
        if capacity == 0 {
            return Err(StoreError::InvalidCapacity);
        }
        Ok(Self {
            name: name.to_string(),
            capacity,
            table: Mutex::new(Some(table)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.lock().is_none()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Table>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_table<T>(&self, f: impl FnOnce(&mut Table) -> Result<T>) -> Result<T> {
        let mut guard = self.lock();
        let table = guard
            .as_mut()
            .ok_or_else(|| StoreError::Closed(self.name.clone()))?;
        f(table)
    }

    /// Append a message and return its id.
    ///
    /// If the store is full, records are evicted in the same commit as the
    /// insert, following the policy in [`eviction`].
    pub fn store(
        &self,
        topic: &str,
        payload: &[u8],
        qos: Qos,
        retain: bool,
        priority: i32,
    ) -> Result<MessageId> {
        if topic.trim().is_empty() {
            return Err(StoreError::InvalidTopic);
        }

        self.with_table(|table| {
            let id = table.generate_id()?;
            let created_on = table.next_created_on(now());
            let message = StoredMessage {
                id,
                topic: topic.to_string(),
                payload: Some(payload.to_vec()),
                qos,
                retain,
                priority,
                created_on,
                state: DeliveryState::Unpublished,
            };

            let needed = eviction::overflow(table.len(), self.capacity);
            let victims = eviction::select_victims(table, needed)?;

            let mut changes: Vec<Change> = victims
                .iter()
                .map(|victim| Change::Remove(victim.message.clone()))
                .collect();
            changes.push(Change::Insert(message));
            table.apply(&changes)?;

            for Eviction { message, class } in &victims {
                warn!(
                    store = %self.name,
                    id = message.id,
                    priority = message.priority,
                    "store full, evicted {class} message"
                );
            }
            debug!(store = %self.name, id, priority, qos = u8::from(qos), "message stored");
            Ok(id)
        })
    }

    /// Full record, payload included.
    pub fn get(&self, id: MessageId) -> Result<Option<StoredMessage>> {
        self.with_table(|table| table.get(id, true))
    }

    /// The unpublished record with the lowest `(priority, created_on, id)`.
    ///
    /// Pure read: the record stays unpublished until it is marked.
    pub fn get_next_message(&self) -> Result<Option<StoredMessage>> {
        self.with_table(|table| table.first_unpublished())
    }

    /// Hand-off without a delivery token. Terminal for QoS 0; QoS ≥ 1
    /// records become in-flight with no token.
    pub fn mark_as_published(&self, id: MessageId) -> Result<Transition> {
        self.transition(id, "publish", |msg, now| msg.state.publish(msg.qos, None, now))
    }

    /// Hand-off of a QoS ≥ 1 record with the transport's correlation token.
    /// For a QoS 0 record the token is discarded and the record completes.
    pub fn mark_as_published_with_token(
        &self,
        id: MessageId,
        token: DeliveryToken,
    ) -> Result<Transition> {
        self.transition(id, "publish", move |msg, now| {
            msg.state.publish(msg.qos, Some(token.clone()), now)
        })
    }

    /// Broker acknowledgment of an in-flight record.
    pub fn mark_as_confirmed(&self, id: MessageId) -> Result<Transition> {
        self.transition(id, "confirm", |msg, now| msg.state.confirm(now))
    }

    fn transition(
        &self,
        id: MessageId,
        action: &str,
        next: impl Fn(&StoredMessage, DateTime<Utc>) -> Option<DeliveryState>,
    ) -> Result<Transition> {
        self.with_table(|table| {
            let Some(before) = table.get(id, false)? else {
                debug!(store = %self.name, id, action, "no such message");
                return Ok(Transition::Missing);
            };
            let Some(state) = next(&before, now()) else {
                warn!(
                    store = %self.name,
                    id,
                    action,
                    state = ?before.state.tag(),
                    "transition rejected"
                );
                return Ok(Transition::Rejected);
            };

            let after = StoredMessage {
                state,
                ..before.clone()
            };
            debug!(store = %self.name, id, action, state = ?after.state.tag(), "transition applied");
            table.apply(&[Change::Update { before, after }])?;
            Ok(Transition::Applied)
        })
    }

    /// Return every in-flight record to the unpublished pool so it is offered
    /// again. Used after a reconnect when delivery status is unknown.
    pub fn unpublish_all_in_flight_messages(&self) -> Result<usize> {
        let count = self.bulk_transition(|state, _| state.requeue())?;
        if count > 0 {
            info!(store = %self.name, count, "in-flight messages requeued");
        }
        Ok(count)
    }

    /// Abandon every in-flight record.
    pub fn drop_all_in_flight_messages(&self) -> Result<usize> {
        let count = self.bulk_transition(|state, now| state.abandon(now))?;
        if count > 0 {
            info!(store = %self.name, count, "in-flight messages dropped");
        }
        Ok(count)
    }

    fn bulk_transition(
        &self,
        next: impl Fn(&DeliveryState, DateTime<Utc>) -> Option<DeliveryState>,
    ) -> Result<usize> {
        self.with_table(|table| {
            let now = now();
            let changes: Vec<Change> = table
                .in_state(StateTag::InFlight)?
                .into_iter()
                .filter_map(|before| {
                    let state = next(&before.state, now)?;
                    let after = StoredMessage {
                        state,
                        ..before.clone()
                    };
                    Some(Change::Update { before, after })
                })
                .collect();
            table.apply(&changes)?;
            Ok(changes.len())
        })
    }

    /// Delete confirmed, dropped and QoS 0 published records whose completion
    /// is at least `purge_age` old. Returns the number of records removed.
    pub fn delete_stale_messages(&self, purge_age: Duration) -> Result<usize> {
        let Some(threshold) = TimeDelta::from_std(purge_age)
            .ok()
            .and_then(|age| now().checked_sub_signed(age))
        else {
            return Ok(0);
        };

        self.with_table(|table| {
            let mut changes = Vec::new();
            for tag in StateTag::TERMINAL {
                for message in table.in_state(tag)? {
                    if message
                        .state
                        .completed_on()
                        .is_some_and(|completed_on| completed_on <= threshold)
                    {
                        changes.push(Change::Remove(message));
                    }
                }
            }
            table.apply(&changes)?;
            if !changes.is_empty() {
                info!(store = %self.name, count = changes.len(), "stale messages deleted");
            }
            Ok(changes.len())
        })
    }

    pub fn get_message_count(&self) -> Result<usize> {
        self.with_table(|table| Ok(table.len()))
    }

    pub fn get_message_counts(&self) -> Result<MessageCounts> {
        self.with_table(|table| {
            Ok(MessageCounts {
                unpublished: table.count_in_state(StateTag::Unpublished),
                in_flight: table.count_in_state(StateTag::InFlight),
                published: table.count_in_state(StateTag::Published),
                confirmed: table.count_in_state(StateTag::Confirmed),
                dropped: table.count_in_state(StateTag::Dropped),
            })
        })
    }

    /// Unpublished records in dispatch order, without payloads.
    pub fn get_unpublished_messages(&self) -> Result<Vec<StoredMessage>> {
        self.with_table(|table| table.unpublished())
    }

    /// In-flight records ordered by priority then age, without payloads.
    pub fn get_in_flight_messages(&self) -> Result<Vec<StoredMessage>> {
        self.list_sorted(StateTag::InFlight)
    }

    /// Dropped records ordered by priority then age, without payloads.
    pub fn get_dropped_messages(&self) -> Result<Vec<StoredMessage>> {
        self.list_sorted(StateTag::Dropped)
    }

    fn list_sorted(&self, tag: StateTag) -> Result<Vec<StoredMessage>> {
        self.with_table(|table| {
            let mut messages = table.in_state(tag)?;
            messages.sort_by_key(StoredMessage::dispatch_key);
            Ok(messages)
        })
    }

    /// Release the table handles. Persisted data is kept; any later call
    /// fails with [`StoreError::Closed`]. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        let Some(table) = self.lock().take() else {
            return Ok(());
        };
        table.flush()?;
        info!(store = %self.name, "message store closed");
        Ok(())
    }
}

impl std::fmt::Debug for MessageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStore")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .finish()
    }
}
