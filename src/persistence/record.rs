//! The stored record and its delivery lifecycle.
//!
//! A record is created `Unpublished` and moves forward only:
//!
//! ```text
//! Unpublished --publish(qos 0)--> Published            (terminal)
//! Unpublished --publish(qos>0)--> InFlight --confirm--> Confirmed (terminal)
//!                                 InFlight --drop-----> Dropped   (terminal)
//!                                 InFlight --unpublish-> Unpublished
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::StoreError;

/// Handle assigned by the store at insert time. Never reused.
pub type MessageId = u64;

/// Delivery guarantee requested by the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Qos {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl Qos {
    /// `true` when delivery has to be acknowledged by the broker.
    pub fn requires_ack(self) -> bool {
        self != Qos::AtMostOnce
    }
}

impl From<Qos> for u8 {
    fn from(qos: Qos) -> Self {
        qos as u8
    }
}

impl TryFrom<u8> for Qos {
    type Error = StoreError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Qos::AtMostOnce),
            1 => Ok(Qos::AtLeastOnce),
            2 => Ok(Qos::ExactlyOnce),
            other => Err(StoreError::InvalidQos(other)),
        }
    }
}

/// Correlation handle handed over by the transport when a QoS ≥ 1 message
/// is sent, used to match the broker's acknowledgment to the record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliveryToken {
    pub message_id: i64,
    pub session_id: String,
}

impl DeliveryToken {
    pub fn new(message_id: i64, session_id: impl Into<String>) -> Self {
        Self {
            message_id,
            session_id: session_id.into(),
        }
    }
}

/// Where a record is in its delivery lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DeliveryState {
    Unpublished,
    /// Handed to the transport with QoS 0. Nothing more will happen to it.
    Published {
        #[serde(with = "chrono::serde::ts_milliseconds")]
        published_on: DateTime<Utc>,
    },
    InFlight {
        #[serde(with = "chrono::serde::ts_milliseconds")]
        published_on: DateTime<Utc>,
        token: Option<DeliveryToken>,
    },
    Confirmed {
        #[serde(with = "chrono::serde::ts_milliseconds")]
        published_on: DateTime<Utc>,
        #[serde(with = "chrono::serde::ts_milliseconds")]
        confirmed_on: DateTime<Utc>,
        token: Option<DeliveryToken>,
    },
    Dropped {
        #[serde(with = "chrono::serde::ts_milliseconds")]
        published_on: DateTime<Utc>,
        #[serde(with = "chrono::serde::ts_milliseconds")]
        dropped_on: DateTime<Utc>,
        token: Option<DeliveryToken>,
    },
}

/// One-byte discriminant used as the prefix of the state index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum StateTag {
    Unpublished = 0,
    InFlight = 1,
    Published = 2,
    Confirmed = 3,
    Dropped = 4,
}

impl StateTag {
    /// States no transition leads out of.
    pub const TERMINAL: [StateTag; 3] =
        [StateTag::Published, StateTag::Confirmed, StateTag::Dropped];
}

impl DeliveryState {
    pub fn tag(&self) -> StateTag {
        match self {
            DeliveryState::Unpublished => StateTag::Unpublished,
            DeliveryState::Published { .. } => StateTag::Published,
            DeliveryState::InFlight { .. } => StateTag::InFlight,
            DeliveryState::Confirmed { .. } => StateTag::Confirmed,
            DeliveryState::Dropped { .. } => StateTag::Dropped,
        }
    }

    pub fn published_on(&self) -> Option<DateTime<Utc>> {
        match self {
            DeliveryState::Unpublished => None,
            DeliveryState::Published { published_on }
            | DeliveryState::InFlight { published_on, .. }
            | DeliveryState::Confirmed { published_on, .. }
            | DeliveryState::Dropped { published_on, .. } => Some(*published_on),
        }
    }

    pub fn confirmed_on(&self) -> Option<DateTime<Utc>> {
        match self {
            DeliveryState::Confirmed { confirmed_on, .. } => Some(*confirmed_on),
            _ => None,
        }
    }

    pub fn dropped_on(&self) -> Option<DateTime<Utc>> {
        match self {
            DeliveryState::Dropped { dropped_on, .. } => Some(*dropped_on),
            _ => None,
        }
    }

    pub fn token(&self) -> Option<&DeliveryToken> {
        match self {
            DeliveryState::InFlight { token, .. }
            | DeliveryState::Confirmed { token, .. }
            | DeliveryState::Dropped { token, .. } => token.as_ref(),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        StateTag::TERMINAL.contains(&self.tag())
    }

    /// The instant the record became eligible for purging, if it is in a
    /// terminal state.
    pub fn completed_on(&self) -> Option<DateTime<Utc>> {
        match self {
            DeliveryState::Published { published_on } => Some(*published_on),
            DeliveryState::Confirmed { confirmed_on, .. } => Some(*confirmed_on),
            DeliveryState::Dropped { dropped_on, .. } => Some(*dropped_on),
            _ => None,
        }
    }

    /// Hand-off to the transport. QoS 0 records finish here, others wait for
    /// an acknowledgment. Returns `None` unless the record is unpublished.
    pub fn publish(
        &self,
        qos: Qos,
        token: Option<DeliveryToken>,
        now: DateTime<Utc>,
    ) -> Option<DeliveryState> {
        if *self != DeliveryState::Unpublished {
            return None;
        }
        if qos.requires_ack() {
            Some(DeliveryState::InFlight {
                published_on: now,
                token,
            })
        } else {
            Some(DeliveryState::Published { published_on: now })
        }
    }

    pub fn confirm(&self, now: DateTime<Utc>) -> Option<DeliveryState> {
        match self {
            DeliveryState::InFlight {
                published_on,
                token,
            } => Some(DeliveryState::Confirmed {
                published_on: *published_on,
                confirmed_on: now,
                token: token.clone(),
            }),
            _ => None,
        }
    }

    pub fn abandon(&self, now: DateTime<Utc>) -> Option<DeliveryState> {
        match self {
            DeliveryState::InFlight {
                published_on,
                token,
            } => Some(DeliveryState::Dropped {
                published_on: *published_on,
                dropped_on: now,
                token: token.clone(),
            }),
            _ => None,
        }
    }

    /// Returns an in-flight record to the unpublished pool, clearing the
    /// publish time and token.
    pub fn requeue(&self) -> Option<DeliveryState> {
        match self {
            DeliveryState::InFlight { .. } => Some(DeliveryState::Unpublished),
            _ => None,
        }
    }
}

/// A message plus its lifecycle metadata.
///
/// `payload` is only populated by single-record reads; bulk listings leave
/// it as `None`. It is persisted separately from the metadata row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: MessageId,
    pub topic: String,
    #[serde(skip)]
    pub payload: Option<Vec<u8>>,
    pub qos: Qos,
    pub retain: bool,
    /// Lower value is served first.
    pub priority: i32,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_on: DateTime<Utc>,
    pub state: DeliveryState,
}

impl StoredMessage {
    /// `(priority, created_on, id)`, the order in which records are offered.
    pub fn dispatch_key(&self) -> (i32, DateTime<Utc>, MessageId) {
        (self.priority, self.created_on, self.id)
    }
}
