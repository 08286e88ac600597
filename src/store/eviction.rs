//! Capacity policy.
//!
//! When an insert would push a store past its capacity, records are evicted
//! in this order until there is room:
//!
//! 1. terminal records (QoS 0 published, confirmed, dropped), lowest id first;
//! 2. unpublished records, lowest priority (highest value) first and the
//!    oldest `(created_on, id)` within a priority;
//! 3. in-flight records, lowest id first.
//!
//! Pending work is never evicted while a terminal record remains.

use std::fmt;

use crate::persistence::{StateTag, StoredMessage, Table};
use crate::utils::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionClass {
    Terminal,
    Unpublished,
    InFlight,
}

impl fmt::Display for EvictionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EvictionClass::Terminal => "terminal",
            EvictionClass::Unpublished => "unpublished",
            EvictionClass::InFlight => "in-flight",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct Eviction {
    pub message: StoredMessage,
    pub class: EvictionClass,
}

/// Number of records to evict so that one more insert fits.
pub fn overflow(count: usize, capacity: usize) -> usize {
    (count + 1).saturating_sub(capacity)
}

/// Pick `needed` victims following the policy above.
pub fn select_victims(table: &Table, needed: usize) -> Result<Vec<Eviction>> {
    let mut victims = Vec::with_capacity(needed);
    if needed == 0 {
        return Ok(victims);
    }

    // Each terminal state index is id-ordered, so the lowest `needed` ids
    // overall are among the first `needed` of each.
    let mut terminal = Vec::with_capacity(needed * StateTag::TERMINAL.len());
    for tag in StateTag::TERMINAL {
        terminal.extend(table.first_ids_in_state(tag, needed)?);
    }
    terminal.sort_unstable();
    for id in terminal.into_iter().take(needed) {
        if let Some(message) = table.get(id, false)? {
            victims.push(Eviction {
                message,
                class: EvictionClass::Terminal,
            });
        }
    }

    if victims.len() < needed {
        let unpublished = table.unpublished_eviction_order(needed - victims.len())?;
        victims.extend(unpublished.into_iter().map(|message| Eviction {
            message,
            class: EvictionClass::Unpublished,
        }));
    }

    if victims.len() < needed {
        let in_flight = table.in_state(StateTag::InFlight)?;
        let remaining = needed - victims.len();
        victims.extend(in_flight.into_iter().take(remaining).map(|message| Eviction {
            message,
            class: EvictionClass::InFlight,
        }));
    }

    Ok(victims)
}
