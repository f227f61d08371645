//! Intent store
//!
//! In-memory view over the journal. Every mutation journals first, then
//! updates the map; the journal is the source of truth. Also maintains the
//! at-most-one-non-terminal-intent-per-entity index the orchestrator checks
//! before creating new intents.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use types::errors::IntentError;
use types::ids::{IntentId, LedgerTxRef};
use types::intent::{Intent, IntentState};

use crate::journal::{read_records, JournalError, JournalRecord, JournalWriter};
use crate::recovery::{replay, RecoveryError};

#[derive(Error, Debug)]
pub enum IntentStoreError {
    #[error("journal error: {0}")]
    Journal(#[from] JournalError),

    #[error("recovery error: {0}")]
    Recovery(#[from] RecoveryError),

    #[error(transparent)]
    Intent(#[from] IntentError),
}

struct Inner {
    intents: HashMap<IntentId, Intent>,
    /// Non-terminal intent per touched entity (order/lot uuid).
    by_entity: HashMap<Uuid, IntentId>,
    journal: Option<JournalWriter>,
}

/// Durable record of every ledger-bound operation and its lifecycle state.
pub struct IntentStore {
    inner: Mutex<Inner>,
}

impl IntentStore {
    /// Volatile store without a journal, for tests and embedded use.
    pub fn in_memory() -> Self {
        Self {
            inner: Mutex::new(Inner {
                intents: HashMap::new(),
                by_entity: HashMap::new(),
                journal: None,
            }),
        }
    }

    /// Open a journal-backed store, replaying existing records.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, IntentStoreError> {
        let path = path.as_ref();
        let intents = replay(read_records(path)?)?;

        let mut by_entity = HashMap::new();
        for intent in intents.values() {
            if !intent.is_terminal() {
                for entity in intent.payload.entity_ids() {
                    by_entity.insert(entity, intent.intent_id);
                }
            }
        }

        info!(
            path = %path.display(),
            intents = intents.len(),
            non_terminal = by_entity.len(),
            "intent store opened"
        );
        Ok(Self {
            inner: Mutex::new(Inner {
                intents,
                by_entity,
                journal: Some(JournalWriter::open(path)?),
            }),
        })
    }

    /// Record a new PENDING intent durably, before any network call.
    ///
    /// Rejects a duplicate id, and rejects the intent outright if any entity
    /// it touches already has a non-terminal intent outstanding.
    pub fn create(&self, intent: Intent) -> Result<(), IntentStoreError> {
        let mut inner = self.lock();
        if inner.intents.contains_key(&intent.intent_id) {
            return Err(IntentError::Duplicate {
                intent_id: intent.intent_id,
            }
            .into());
        }
        for entity in intent.payload.entity_ids() {
            if let Some(existing) = inner.by_entity.get(&entity) {
                return Err(IntentError::EntityBusy {
                    entity_id: entity,
                    intent_id: *existing,
                }
                .into());
            }
        }

        if let Some(journal) = inner.journal.as_mut() {
            journal.append(&JournalRecord::Created {
                intent: intent.clone(),
            })?;
        }
        for entity in intent.payload.entity_ids() {
            inner.by_entity.insert(entity, intent.intent_id);
        }
        inner.intents.insert(intent.intent_id, intent);
        Ok(())
    }

    /// Record one submission attempt.
    pub fn record_attempt(&self, intent_id: IntentId, at: i64) -> Result<(), IntentStoreError> {
        let mut inner = self.lock();
        inner.require(intent_id)?;
        if let Some(journal) = inner.journal.as_mut() {
            journal.append(&JournalRecord::Attempt { intent_id, at })?;
        }
        inner
            .intents
            .get_mut(&intent_id)
            .expect("checked above")
            .record_attempt(at);
        Ok(())
    }

    /// Ledger acknowledged receipt; record the assigned reference.
    pub fn mark_submitted(
        &self,
        intent_id: IntentId,
        tx_ref: LedgerTxRef,
        at: i64,
    ) -> Result<Intent, IntentStoreError> {
        self.apply(intent_id, |intent| intent.mark_submitted(tx_ref.clone(), at), {
            JournalRecord::Submitted {
                intent_id,
                tx_ref: tx_ref.clone(),
                at,
            }
        })
    }

    pub fn mark_confirmed(&self, intent_id: IntentId, at: i64) -> Result<Intent, IntentStoreError> {
        self.apply(
            intent_id,
            |intent| intent.mark_confirmed(at),
            JournalRecord::Confirmed { intent_id, at },
        )
    }

    pub fn mark_failed(&self, intent_id: IntentId, at: i64) -> Result<Intent, IntentStoreError> {
        self.apply(
            intent_id,
            |intent| intent.mark_failed(at),
            JournalRecord::Failed { intent_id, at },
        )
    }

    pub fn mark_unknown(&self, intent_id: IntentId, at: i64) -> Result<Intent, IntentStoreError> {
        self.apply(
            intent_id,
            |intent| intent.mark_unknown(at),
            JournalRecord::Unknown { intent_id, at },
        )
    }

    pub fn get(&self, intent_id: &IntentId) -> Option<Intent> {
        self.lock().intents.get(intent_id).cloned()
    }

    /// All intents not yet CONFIRMED or FAILED.
    pub fn non_terminal(&self) -> Vec<Intent> {
        self.lock()
            .intents
            .values()
            .filter(|i| !i.is_terminal())
            .cloned()
            .collect()
    }

    /// SUBMITTED or UNKNOWN intents idle longer than `grace_nanos` —
    /// candidates for reconciliation.
    pub fn stuck(&self, now: i64, grace_nanos: i64) -> Vec<Intent> {
        self.lock()
            .intents
            .values()
            .filter(|i| matches!(i.state, IntentState::Submitted | IntentState::Unknown))
            .filter(|i| i.idle_nanos(now) >= grace_nanos)
            .cloned()
            .collect()
    }

    /// PENDING intents idle longer than `grace_nanos`: a crash landed
    /// between the durable create and the submission.
    pub fn stale_pending(&self, now: i64, grace_nanos: i64) -> Vec<Intent> {
        self.lock()
            .intents
            .values()
            .filter(|i| i.state == IntentState::Pending)
            .filter(|i| i.idle_nanos(now) >= grace_nanos)
            .cloned()
            .collect()
    }

    /// The non-terminal intent touching `entity`, if any.
    pub fn non_terminal_for(&self, entity: &Uuid) -> Option<IntentId> {
        self.lock().by_entity.get(entity).copied()
    }

    fn apply(
        &self,
        intent_id: IntentId,
        transition: impl FnOnce(&mut Intent) -> Result<(), IntentError>,
        record: JournalRecord,
    ) -> Result<Intent, IntentStoreError> {
        let mut inner = self.lock();
        inner.require(intent_id)?;

        // Validate against a copy first: the journal must never hold a
        // transition the state machine rejects.
        let mut updated = inner.intents[&intent_id].clone();
        transition(&mut updated)?;

        if let Some(journal) = inner.journal.as_mut() {
            journal.append(&record)?;
        }
        if updated.is_terminal() {
            for entity in updated.payload.entity_ids() {
                inner.by_entity.remove(&entity);
            }
        }
        inner.intents.insert(intent_id, updated.clone());
        Ok(updated)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("intent store mutex poisoned")
    }
}

impl Inner {
    fn require(&self, intent_id: IntentId) -> Result<(), IntentError> {
        if self.intents.contains_key(&intent_id) {
            Ok(())
        } else {
            Err(IntentError::NotFound { intent_id })
        }
    }
}
