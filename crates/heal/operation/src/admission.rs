//! Admission control
//!
//! Time-window gates evaluated before any destructive action. Each gate is a
//! pure function of the observed state and an injected `now`; the side
//! effect of stamping a first sighting lives in
//! [`NodeOperation::admit_ecs`](crate::NodeOperation::admit_ecs).

use std::time::Duration;

use chrono::{DateTime, Utc};
use heal_types::{ComputeInstance, MembershipRecord};

use crate::error::{OperationError, OperationResult};

/// Outcome of an admission gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admit,
    /// Not yet; re-evaluate after the delay.
    Deny { after: Duration },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admit)
    }

    /// Map a denial onto the retry sentinel.
    pub fn into_result(self) -> OperationResult<()> {
        match self {
            Admission::Admit => Ok(()),
            Admission::Deny { after } => Err(OperationError::Retry { after }),
        }
    }
}

/// Time since `since`, clamped at zero for clocks that disagree.
fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or_default()
}

/// A recently created instance is still booting.
pub fn admit_fresh(instance: &ComputeInstance, now: DateTime<Utc>, min_age: Duration) -> Admission {
    let age = elapsed(instance.created_at, now);
    if age < min_age {
        Admission::Deny {
            after: min_age - age,
        }
    } else {
        Admission::Admit
    }
}

/// Gate on how long the membership record has been unready.
///
/// A machine without a record has nothing to lose and is admitted at once.
/// A ready record is never admitted.
pub fn admit_node(
    node: Option<&MembershipRecord>,
    now: DateTime<Utc>,
    window: Duration,
    retry_after: Duration,
) -> Admission {
    let Some(node) = node else {
        return Admission::Admit;
    };
    match node.unready_since() {
        None => Admission::Deny { after: retry_after },
        Some(since) => {
            let unready = elapsed(since, now);
            if unready >= window {
                Admission::Admit
            } else {
                Admission::Deny {
                    after: window - unready,
                }
            }
        }
    }
}

/// Gate on the last repair stamp of an instance.
///
/// A missing stamp is a first sighting and is denied for a full window.
pub fn admit_ecs(
    last_repaired: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    window: Duration,
) -> Admission {
    match last_repaired {
        None => Admission::Deny { after: window },
        Some(at) => {
            let since = elapsed(at, now);
            if since > window {
                Admission::Admit
            } else {
                Admission::Deny {
                    after: window - since,
                }
            }
        }
    }
}
