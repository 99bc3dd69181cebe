//! Call lifecycle state machine
//!
//! `pending → {answered | no_answer | busy | failed | rejected | voicemail}`.
//! Every result change on a [`CallRecord`] goes through [`apply_result`],
//! which enforces:
//!
//! - `pending` is the only state that can be left;
//! - the first terminal result wins: a later, different terminal result is
//!   rejected with [`TransitionError::AlreadyTerminal`];
//! - re-asserting the current terminal result is an idempotent no-op.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{CallRecord, CallResult};

/// Rejected result change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("call already ended as {current}, refusing {proposed}")]
    AlreadyTerminal {
        current: CallResult,
        proposed: CallResult,
    },

    #[error("call ended as {current} and cannot return to pending")]
    ToPending { current: CallResult },
}

/// Outcome of an accepted result change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The result moved from `from` to `to`
    Applied { from: CallResult, to: CallResult },
    /// Nothing to change
    Unchanged,
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied { .. })
    }
}

/// Decide whether `current → proposed` is legal, without touching a record
pub fn validate_transition(
    current: CallResult,
    proposed: CallResult,
) -> Result<Transition, TransitionError> {
    match (current, proposed) {
        (CallResult::Pending, CallResult::Pending) => Ok(Transition::Unchanged),
        (CallResult::Pending, to) => Ok(Transition::Applied {
            from: CallResult::Pending,
            to,
        }),
        (current, CallResult::Pending) => Err(TransitionError::ToPending { current }),
        (current, proposed) if current == proposed => Ok(Transition::Unchanged),
        (current, proposed) => Err(TransitionError::AlreadyTerminal { current, proposed }),
    }
}

/// Validate and apply a result change to `record`.
///
/// Reaching `answered` stamps `time_answered` if it is unset. On error the
/// record is left untouched.
pub fn apply_result(
    record: &mut CallRecord,
    proposed: CallResult,
    at: DateTime<Utc>,
) -> Result<Transition, TransitionError> {
    let transition = validate_transition(record.result, proposed)?;

    if let Transition::Applied { to, .. } = transition {
        record.result = to;
        if to == CallResult::Answered && record.time_answered.is_none() {
            record.time_answered = Some(at);
        }
    }

    Ok(transition)
}
