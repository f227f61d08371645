//! Journal replay
//!
//! Rebuilds the in-memory intent map by replaying lifecycle records in
//! append order through the same transition rules used at runtime, so a
//! recovered store can never hold a state the live store could not reach.

use std::collections::HashMap;
use thiserror::Error;
use tracing::info;
use types::errors::IntentError;
use types::ids::IntentId;
use types::intent::Intent;

use crate::journal::JournalRecord;

#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("journal references unknown intent {intent_id}")]
    UnknownIntent { intent_id: IntentId },

    #[error("journal replay produced invalid transition: {0}")]
    Transition(#[from] IntentError),

    #[error("duplicate Created record for intent {intent_id}")]
    DuplicateCreated { intent_id: IntentId },
}

/// Replay `records` into the intent map.
pub fn replay(records: Vec<JournalRecord>) -> Result<HashMap<IntentId, Intent>, RecoveryError> {
    let mut intents: HashMap<IntentId, Intent> = HashMap::new();
    let count = records.len();

    for record in records {
        match record {
            JournalRecord::Created { intent } => {
                let intent_id = intent.intent_id;
                if intents.insert(intent_id, intent).is_some() {
                    return Err(RecoveryError::DuplicateCreated { intent_id });
                }
            }
            JournalRecord::Attempt { intent_id, at } => {
                lookup(&mut intents, intent_id)?.record_attempt(at);
            }
            JournalRecord::Submitted { intent_id, tx_ref, at } => {
                lookup(&mut intents, intent_id)?.mark_submitted(tx_ref, at)?;
            }
            JournalRecord::Confirmed { intent_id, at } => {
                lookup(&mut intents, intent_id)?.mark_confirmed(at)?;
            }
            JournalRecord::Failed { intent_id, at } => {
                lookup(&mut intents, intent_id)?.mark_failed(at)?;
            }
            JournalRecord::Unknown { intent_id, at } => {
                lookup(&mut intents, intent_id)?.mark_unknown(at)?;
            }
        }
    }

    info!(records = count, intents = intents.len(), "intent journal replayed");
    Ok(intents)
}

fn lookup(
    intents: &mut HashMap<IntentId, Intent>,
    intent_id: IntentId,
) -> Result<&mut Intent, RecoveryError> {
    intents
        .get_mut(&intent_id)
        .ok_or(RecoveryError::UnknownIntent { intent_id })
}
