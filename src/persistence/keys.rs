//! Order-preserving key encodings for the sled trees.
//!
//! sled iterates keys in lexicographic byte order, so every component is
//! written big-endian with the sign bit flipped for signed integers. That
//! makes byte order equal to numeric order.

use chrono::{DateTime, Utc};

use super::record::{MessageId, StateTag};

pub const ID_LEN: usize = 8;
pub const PRIORITY_LEN: usize = 4;
pub const NEXT_MSG_LEN: usize = PRIORITY_LEN + 8 + ID_LEN;
pub const STATE_LEN: usize = 1 + ID_LEN;

pub fn id_key(id: MessageId) -> [u8; ID_LEN] {
    id.to_be_bytes()
}

pub fn decode_id(bytes: &[u8]) -> Option<MessageId> {
    let raw: [u8; ID_LEN] = bytes.try_into().ok()?;
    Some(MessageId::from_be_bytes(raw))
}

pub fn priority_prefix(priority: i32) -> [u8; PRIORITY_LEN] {
    ((priority as u32) ^ 0x8000_0000).to_be_bytes()
}

/// Key of the dispatch index: `(priority, created_on, id)`.
pub fn next_msg_key(priority: i32, created_on: DateTime<Utc>, id: MessageId) -> [u8; NEXT_MSG_LEN] {
    let created = (created_on.timestamp_millis() as u64) ^ (1 << 63);
    let mut key = [0u8; NEXT_MSG_LEN];
    key[..PRIORITY_LEN].copy_from_slice(&priority_prefix(priority));
    key[PRIORITY_LEN..PRIORITY_LEN + 8].copy_from_slice(&created.to_be_bytes());
    key[PRIORITY_LEN + 8..].copy_from_slice(&id_key(id));
    key
}

pub fn next_msg_id(key: &[u8]) -> Option<MessageId> {
    if key.len() != NEXT_MSG_LEN {
        return None;
    }
    decode_id(&key[NEXT_MSG_LEN - ID_LEN..])
}

pub fn state_key(tag: StateTag, id: MessageId) -> [u8; STATE_LEN] {
    let mut key = [0u8; STATE_LEN];
    key[0] = tag as u8;
    key[1..].copy_from_slice(&id_key(id));
    key
}

pub fn state_id(key: &[u8]) -> Option<MessageId> {
    if key.len() != STATE_LEN {
        return None;
    }
    decode_id(&key[1..])
}

pub fn tree_name(store: &str, suffix: &str) -> String {
    format!("{store}.{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_prefix_sorts_numerically() {
        let mut values = vec![i32::MAX, 5, -1, 0, i32::MIN, 1];
        let mut keys: Vec<_> = values.iter().map(|p| priority_prefix(*p)).collect();
        keys.sort();
        values.sort();
        let expected: Vec<_> = values.iter().map(|p| priority_prefix(*p)).collect();
        assert_eq!(keys, expected);
    }

    #[test]
    fn next_msg_key_orders_by_priority_then_time_then_id() {
        let t0 = DateTime::from_timestamp_millis(1_000).unwrap();
        let t1 = DateTime::from_timestamp_millis(2_000).unwrap();

        assert!(next_msg_key(1, t1, 9) < next_msg_key(5, t0, 1));
        assert!(next_msg_key(5, t0, 9) < next_msg_key(5, t1, 1));
        assert!(next_msg_key(5, t0, 1) < next_msg_key(5, t0, 2));
        assert_eq!(next_msg_id(&next_msg_key(-3, t0, 42)), Some(42));
    }

    #[test]
    fn state_key_groups_by_tag() {
        assert!(state_key(StateTag::Unpublished, 100) < state_key(StateTag::InFlight, 1));
        assert_eq!(state_id(&state_key(StateTag::Dropped, 7)), Some(7));
        assert_eq!(state_id(b"short"), None);
    }
}
