//! Swap state machine.
//!
//! [`evaluate`] maps a stored order plus fresh chain observations to the
//! order as it should be persisted next. It is pure: no I/O, no clock. At
//! most one order-level transition fires per call, so an order that is
//! several stages behind the chains catches up over several polls and never
//! skips a stage.
//!
//! | from                  | observed                    | to                    |
//! |-----------------------|-----------------------------|-----------------------|
//! | Filled                | initiator leg initiated     | InitiatorInitiated    |
//! | InitiatorInitiated    | follower leg initiated      | FollowerInitiated     |
//! | FollowerInitiated     | follower leg redeemed       | FollowerRedeemed      |
//! | FollowerRedeemed      | initiator leg redeemed      | InitiatorRedeemed     |
//! | InitiatorRedeemed     | -                           | Executed              |
//!
//! An initiation with fewer confirmations than the leg's minimum only marks
//! the leg `Detected`. `Filled` orders whose initiator never shows up fail
//! soft after the fill timeout; `InitiatorInitiated` orders whose follower
//! never shows up fail hard after the initiate timeout.

use std::time::Duration;

use crate::chain::{Initiation, Redemption, sha256_hex};
use crate::order::{AtomicSwap, Order, OrderStatus, SwapStatus};

#[derive(Debug, Clone, Default)]
pub struct LegObservation {
    pub initiation: Option<Initiation>,
    pub redemption: Option<Redemption>,
}

#[derive(Debug, Clone, Default)]
pub struct Observations {
    pub initiator: LegObservation,
    pub follower: LegObservation,
}

/// Which chain queries an order in a given status needs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Needs {
    pub initiator_initiation: bool,
    pub follower_initiation: bool,
    pub follower_redemption: bool,
    pub initiator_redemption: bool,
}

impl Needs {
    pub fn for_status(status: OrderStatus) -> Self {
        let mut needs = Needs::default();
        match status {
            OrderStatus::Filled => needs.initiator_initiation = true,
            OrderStatus::InitiatorAtomicSwapInitiated => needs.follower_initiation = true,
            OrderStatus::FollowerAtomicSwapInitiated => needs.follower_redemption = true,
            OrderStatus::FollowerAtomicSwapRedeemed => needs.initiator_redemption = true,
            _ => {}
        }
        needs
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Deadlines {
    pub fill_timeout: Duration,
    pub initiate_timeout: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum MachineError {
    #[error("missing {0} observation")]
    MissingObservation(&'static str),
    #[error("revealed secret does not match secret hash {secret_hash}")]
    SecretMismatch { secret_hash: String },
}

/// Returns the updated order, or `None` when nothing observable changed.
pub fn evaluate(
    order: &Order,
    obs: &Observations,
    deadlines: &Deadlines,
    now: i64,
) -> Result<Option<Order>, MachineError> {
    let mut next = order.clone();
    let expired = |timeout: Duration| {
        now.saturating_sub(order.updated_at) >= i64::try_from(timeout.as_secs()).unwrap_or(i64::MAX)
    };

    match order.status {
        OrderStatus::Filled => {
            let seen = obs
                .initiator
                .initiation
                .as_ref()
                .ok_or(MachineError::MissingObservation("initiator initiation"))?;
            if seen.initiated {
                if observe_initiation(&mut next.initiator_atomic_swap, seen) {
                    next.status = OrderStatus::InitiatorAtomicSwapInitiated;
                }
            } else if expired(deadlines.fill_timeout) {
                next.status = OrderStatus::FailedSoft;
            }
        }
        OrderStatus::InitiatorAtomicSwapInitiated => {
            let seen = obs
                .follower
                .initiation
                .as_ref()
                .ok_or(MachineError::MissingObservation("follower initiation"))?;
            if seen.initiated {
                if observe_initiation(&mut next.follower_atomic_swap, seen) {
                    next.status = OrderStatus::FollowerAtomicSwapInitiated;
                }
            } else if expired(deadlines.initiate_timeout) {
                next.status = OrderStatus::FailedHard;
            }
        }
        OrderStatus::FollowerAtomicSwapInitiated => {
            let seen = obs
                .follower
                .redemption
                .as_ref()
                .ok_or(MachineError::MissingObservation("follower redemption"))?;
            if seen.redeemed {
                if sha256_hex(&seen.secret) != order.secret_hash {
                    return Err(MachineError::SecretMismatch {
                        secret_hash: order.secret_hash.clone(),
                    });
                }
                observe_redemption(&mut next.follower_atomic_swap, seen);
                next.secret.get_or_insert_with(|| hex::encode(&seen.secret));
                next.status = OrderStatus::FollowerAtomicSwapRedeemed;
            }
        }
        OrderStatus::FollowerAtomicSwapRedeemed => {
            let seen = obs
                .initiator
                .redemption
                .as_ref()
                .ok_or(MachineError::MissingObservation("initiator redemption"))?;
            if seen.redeemed {
                observe_redemption(&mut next.initiator_atomic_swap, seen);
                next.status = OrderStatus::InitiatorAtomicSwapRedeemed;
            }
        }
        OrderStatus::InitiatorAtomicSwapRedeemed => {
            next.status = OrderStatus::Executed;
        }
        OrderStatus::Created
        | OrderStatus::Executed
        | OrderStatus::FailedSoft
        | OrderStatus::FailedHard
        | OrderStatus::Cancelled => {}
    }

    if next.status != order.status {
        next.updated_at = now;
    }
    Ok((next != *order).then_some(next))
}

/// Records an initiation on `leg`; true once it has enough confirmations.
fn observe_initiation(leg: &mut AtomicSwap, seen: &Initiation) -> bool {
    if leg.status.rank() >= SwapStatus::Initiated.rank() {
        return true;
    }
    if leg.initiate_tx_hash.is_none() && !seen.tx_hash.is_empty() {
        leg.initiate_tx_hash = Some(seen.tx_hash.clone());
    }
    leg.current_confirmations = seen.confirmations;
    if seen.confirmations >= leg.minimum_confirmations {
        leg.status = SwapStatus::Initiated;
        true
    } else {
        leg.status = SwapStatus::Detected;
        false
    }
}

fn observe_redemption(leg: &mut AtomicSwap, seen: &Redemption) {
    if leg.redeem_tx_hash.is_none() && !seen.tx_hash.is_empty() {
        leg.redeem_tx_hash = Some(seen.tx_hash.clone());
    }
    leg.status = SwapStatus::Redeemed;
}
