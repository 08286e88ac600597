//! Persistent table backed by `sled`
//!
//! Each named store owns four trees in a shared `sled::Db`:
//!
//! - `<name>.records`: id -> JSON metadata row
//! - `<name>.payloads`: id -> raw payload bytes
//! - `<name>.next_msg`: `(priority, created_on, id)` -> empty, unpublished
//!   records only, so the first key is the next message to send
//! - `<name>.states`: `(state tag, id)` -> empty, one entry per record
//!
//! Every mutation goes through [`Table::apply`], which writes all four trees
//! in one sled transaction so the indexes never disagree with the rows, even
//! across a crash.

use chrono::{DateTime, Utc};
use sled::transaction::{ConflictableTransactionError, Transactional};
use sled::{Db, IVec, Tree};
use tracing::debug;

use super::keys;
use super::record::{MessageId, StateTag, StoredMessage};
use crate::utils::{Result, StoreError};

const RECORDS: &str = "records";
const PAYLOADS: &str = "payloads";
const NEXT_MSG: &str = "next_msg";
const STATES: &str = "states";
const SUFFIXES: [&str; 4] = [RECORDS, PAYLOADS, NEXT_MSG, STATES];

/// A single logical change to the table.
#[derive(Debug, Clone)]
pub enum Change {
    /// New record; `payload` must be populated.
    Insert(StoredMessage),
    /// Replace the row of an existing record. `before` is the row as read
    /// under the store lock, used to retire its index entries.
    Update {
        before: StoredMessage,
        after: StoredMessage,
    },
    Remove(StoredMessage),
}

/// Key/value writes per tree; `None` removes the key.
#[derive(Default)]
struct WriteSet {
    records: Vec<(Vec<u8>, Option<Vec<u8>>)>,
    payloads: Vec<(Vec<u8>, Option<Vec<u8>>)>,
    next_msg: Vec<(Vec<u8>, Option<Vec<u8>>)>,
    states: Vec<(Vec<u8>, Option<Vec<u8>>)>,
}

impl WriteSet {
    fn index(&mut self, msg: &StoredMessage, present: bool) {
        let value = present.then(Vec::new);
        self.states
            .push((keys::state_key(msg.state.tag(), msg.id).to_vec(), value.clone()));
        if msg.state.tag() == StateTag::Unpublished {
            self.next_msg.push((
                keys::next_msg_key(msg.priority, msg.created_on, msg.id).to_vec(),
                value,
            ));
        }
    }
}

pub struct Table {
    name: String,
    db: Db,
    records: Tree,
    payloads: Tree,
    next_msg: Tree,
    states: Tree,
    count: usize,
    last_created_on: DateTime<Utc>,
    sync_writes: bool,
    #[cfg(test)]
    pub(crate) fail_flush: bool,
}

impl Table {
    /// Attach to the trees of `name`, creating them if absent.
    pub fn open(db: &Db, name: &str, sync_writes: bool) -> Result<Self> {
        let records = db.open_tree(keys::tree_name(name, RECORDS))?;
        let payloads = db.open_tree(keys::tree_name(name, PAYLOADS))?;
        let next_msg = db.open_tree(keys::tree_name(name, NEXT_MSG))?;
        let states = db.open_tree(keys::tree_name(name, STATES))?;

        let count = records.len();
        let last_created_on = match records.last()? {
            Some((_, row)) => serde_json::from_slice::<StoredMessage>(&row)?.created_on,
            None => DateTime::<Utc>::MIN_UTC,
        };

        debug!(store = name, count, "table opened");

        Ok(Self {
            name: name.to_string(),
            db: db.clone(),
            records,
            payloads,
            next_msg,
            states,
            count,
            last_created_on,
            sync_writes,
            #[cfg(test)]
            fail_flush: false,
        })
    }

    /// Drop every tree belonging to `name`. Returns `false` if none existed.
    pub fn destroy(db: &Db, name: &str) -> Result<bool> {
        let mut existed = false;
        for suffix in SUFFIXES {
            existed |= db.drop_tree(keys::tree_name(name, suffix))?;
        }
        if existed {
            db.flush()?;
        }
        Ok(existed)
    }

    /// Names of all stores that have a records tree in `db`.
    pub fn names(db: &Db) -> Vec<String> {
        let suffix = format!(".{RECORDS}");
        let mut names: Vec<String> = db
            .tree_names()
            .iter()
            .filter_map(|raw| std::str::from_utf8(raw).ok())
            .filter_map(|name| name.strip_suffix(suffix.as_str()))
            .map(str::to_string)
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Unique, monotonically increasing id that survives restarts.
    pub fn generate_id(&self) -> Result<MessageId> {
        Ok(self.db.generate_id()?)
    }

    /// Creation timestamp for a new record. Never earlier than the previous
    /// one, so a clock stepping backwards cannot reorder same-priority
    /// records.
    pub fn next_created_on(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        let created_on = now.max(self.last_created_on);
        self.last_created_on = created_on;
        created_on
    }

    pub fn get(&self, id: MessageId, with_payload: bool) -> Result<Option<StoredMessage>> {
        let key = keys::id_key(id);
        let Some(row) = self.records.get(key)? else {
            return Ok(None);
        };
        let mut msg: StoredMessage = serde_json::from_slice(&row)?;
        if with_payload {
            let payload = self.payloads.get(key)?.map(|p| p.to_vec()).unwrap_or_default();
            msg.payload = Some(payload);
        }
        Ok(Some(msg))
    }

    /// Like [`Table::get`], for ids taken from an index.
    fn get_indexed(&self, id: MessageId, with_payload: bool) -> Result<StoredMessage> {
        self.get(id, with_payload)?.ok_or_else(|| {
            StoreError::Corrupt(format!("{}: index refers to missing record {id}", self.name))
        })
    }

    /// Head of the dispatch index.
    pub fn first_unpublished(&self) -> Result<Option<StoredMessage>> {
        match self.next_msg.first()? {
            Some((key, _)) => {
                let id = decode_next_msg(&key)?;
                Ok(Some(self.get_indexed(id, true)?))
            }
            None => Ok(None),
        }
    }

    /// Unpublished records in dispatch order, without payloads.
    pub fn unpublished(&self) -> Result<Vec<StoredMessage>> {
        self.next_msg
            .iter()
            .map(|entry| {
                let (key, _) = entry?;
                self.get_indexed(decode_next_msg(&key)?, false)
            })
            .collect()
    }

    /// Unpublished records to give up first when the table is full: lowest
    /// priority (highest value) first, oldest first within a priority.
    pub fn unpublished_eviction_order(&self, limit: usize) -> Result<Vec<StoredMessage>> {
        let mut victims = Vec::new();
        let mut bound: Option<[u8; keys::PRIORITY_LEN]> = None;

        while victims.len() < limit {
            let last = match bound {
                None => self.next_msg.last()?,
                Some(prefix) => self.next_msg.range(..prefix).next_back().transpose()?,
            };
            let Some((key, _)) = last else {
                break;
            };
            let mut prefix = [0u8; keys::PRIORITY_LEN];
            prefix.copy_from_slice(&key[..keys::PRIORITY_LEN]);

            for entry in self.next_msg.scan_prefix(prefix) {
                let (key, _) = entry?;
                victims.push(self.get_indexed(decode_next_msg(&key)?, false)?);
                if victims.len() == limit {
                    break;
                }
            }
            bound = Some(prefix);
        }
        Ok(victims)
    }

    /// Ids in `tag`, ascending.
    pub fn ids_in_state(&self, tag: StateTag) -> Result<Vec<MessageId>> {
        self.states
            .scan_prefix([tag as u8])
            .map(|entry| {
                let (key, _) = entry?;
                keys::state_id(&key).ok_or_else(|| self.bad_key(STATES, &key))
            })
            .collect()
    }

    /// The lowest `limit` ids in `tag`, ascending. Reads only `limit` index
    /// entries.
    pub fn first_ids_in_state(&self, tag: StateTag, limit: usize) -> Result<Vec<MessageId>> {
        self.states
            .scan_prefix([tag as u8])
            .take(limit)
            .map(|entry| {
                let (key, _) = entry?;
                keys::state_id(&key).ok_or_else(|| self.bad_key(STATES, &key))
            })
            .collect()
    }

    /// Records in `tag`, ascending by id, without payloads.
    pub fn in_state(&self, tag: StateTag) -> Result<Vec<StoredMessage>> {
        self.ids_in_state(tag)?
            .into_iter()
            .map(|id| self.get_indexed(id, false))
            .collect()
    }

    pub fn count_in_state(&self, tag: StateTag) -> usize {
        self.states.scan_prefix([tag as u8]).count()
    }

    /// Commit `changes` atomically across all trees.
    pub fn apply(&mut self, changes: &[Change]) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }

        let mut writes = WriteSet::default();
        let mut inserted = 0usize;
        let mut removed = 0usize;

        for change in changes {
            match change {
                Change::Insert(msg) => {
                    let key = keys::id_key(msg.id).to_vec();
                    let payload = msg.payload.clone().unwrap_or_default();
                    writes.records.push((key.clone(), Some(serde_json::to_vec(msg)?)));
                    writes.payloads.push((key, Some(payload)));
                    writes.index(msg, true);
                    inserted += 1;
                }
                Change::Update { before, after } => {
                    let key = keys::id_key(after.id).to_vec();
                    writes.records.push((key, Some(serde_json::to_vec(after)?)));
                    if before.state.tag() != after.state.tag() {
                        writes.index(before, false);
                        writes.index(after, true);
                    }
                }
                Change::Remove(msg) => {
                    let key = keys::id_key(msg.id).to_vec();
                    writes.records.push((key.clone(), None));
                    writes.payloads.push((key, None));
                    writes.index(msg, false);
                    removed += 1;
                }
            }
        }

        (&self.records, &self.payloads, &self.next_msg, &self.states).transaction(
            |(records, payloads, next_msg, states)| {
                for (tree, ops) in [
                    (records, &writes.records),
                    (payloads, &writes.payloads),
                    (next_msg, &writes.next_msg),
                    (states, &writes.states),
                ] {
                    for (key, value) in ops {
                        match value {
                            Some(value) => tree.insert(key.as_slice(), value.as_slice())?,
                            None => tree.remove(key.as_slice())?,
                        };
                    }
                }
                Ok::<(), ConflictableTransactionError<StoreError>>(())
            },
        )?;

        // Committed from here on, whether or not the flush succeeds.
        self.count = (self.count + inserted).saturating_sub(removed);

        if self.sync_writes {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        #[cfg(test)]
        if self.fail_flush {
            return Err(sled::Error::Io(std::io::Error::other("flush failed")).into());
        }
        self.db.flush()?;
        Ok(())
    }

    fn bad_key(&self, tree: &str, key: &IVec) -> StoreError {
        StoreError::Corrupt(format!("{}.{tree}: malformed key {:?}", self.name, key.as_ref()))
    }
}

fn decode_next_msg(key: &IVec) -> Result<MessageId> {
    keys::next_msg_id(key)
        .ok_or_else(|| StoreError::Corrupt(format!("malformed dispatch key {:?}", key.as_ref())))
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.name)
            .field("count", &self.count)
            .field("db", &"sled::Db")
            .finish()
    }
}
