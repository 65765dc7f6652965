pub mod pair;
pub mod store;

use serde::{Deserialize, Serialize};

pub use pair::{Asset, Chain, Leg, OrderPair};

/// Errors a caller is expected to branch on. They travel inside
/// `anyhow::Error`; everything else is infrastructure failure.
#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("order not found: {0}")]
    NotFound(i64),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Created,
    Filled,
    InitiatorAtomicSwapInitiated,
    FollowerAtomicSwapInitiated,
    FollowerAtomicSwapRedeemed,
    InitiatorAtomicSwapRedeemed,
    Executed,
    FailedSoft,
    FailedHard,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 10] = [
        OrderStatus::Created,
        OrderStatus::Filled,
        OrderStatus::InitiatorAtomicSwapInitiated,
        OrderStatus::FollowerAtomicSwapInitiated,
        OrderStatus::FollowerAtomicSwapRedeemed,
        OrderStatus::InitiatorAtomicSwapRedeemed,
        OrderStatus::Executed,
        OrderStatus::FailedSoft,
        OrderStatus::FailedHard,
        OrderStatus::Cancelled,
    ];

    /// Position along the happy path. Failure and cancellation share the
    /// top rank: nothing follows them.
    pub fn rank(self) -> u8 {
        match self {
            OrderStatus::Created => 0,
            OrderStatus::Filled => 1,
            OrderStatus::InitiatorAtomicSwapInitiated => 2,
            OrderStatus::FollowerAtomicSwapInitiated => 3,
            OrderStatus::FollowerAtomicSwapRedeemed => 4,
            OrderStatus::InitiatorAtomicSwapRedeemed => 5,
            OrderStatus::Executed => 6,
            OrderStatus::FailedSoft | OrderStatus::FailedHard | OrderStatus::Cancelled => 7,
        }
    }

    /// Filled but not yet settled: the orders the watcher drives.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::InitiatorAtomicSwapInitiated
                | OrderStatus::FollowerAtomicSwapInitiated
                | OrderStatus::FollowerAtomicSwapRedeemed
                | OrderStatus::InitiatorAtomicSwapRedeemed
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Executed
                | OrderStatus::FailedSoft
                | OrderStatus::FailedHard
                | OrderStatus::Cancelled
        )
    }

    fn is_progress(self) -> bool {
        self.rank() <= OrderStatus::Executed.rank()
    }

    /// Whether a stored order in `self` may be overwritten with `next`.
    /// Progress moves one stage at a time.
    pub fn can_advance_to(self, next: OrderStatus) -> bool {
        if self == next {
            return true;
        }
        match next {
            OrderStatus::Cancelled => self == OrderStatus::Created,
            OrderStatus::FailedSoft | OrderStatus::FailedHard => self.is_active(),
            _ => self.is_progress() && next.is_progress() && next.rank() == self.rank() + 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Created => "created",
            OrderStatus::Filled => "filled",
            OrderStatus::InitiatorAtomicSwapInitiated => "initiator_atomic_swap_initiated",
            OrderStatus::FollowerAtomicSwapInitiated => "follower_atomic_swap_initiated",
            OrderStatus::FollowerAtomicSwapRedeemed => "follower_atomic_swap_redeemed",
            OrderStatus::InitiatorAtomicSwapRedeemed => "initiator_atomic_swap_redeemed",
            OrderStatus::Executed => "executed",
            OrderStatus::FailedSoft => "failed_soft",
            OrderStatus::FailedHard => "failed_hard",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapStatus {
    NotStarted,
    Detected,
    Initiated,
    Expired,
    Redeemed,
    Refunded,
}

impl SwapStatus {
    pub fn rank(self) -> u8 {
        match self {
            SwapStatus::NotStarted => 0,
            SwapStatus::Detected => 1,
            SwapStatus::Initiated => 2,
            SwapStatus::Expired | SwapStatus::Redeemed | SwapStatus::Refunded => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SwapStatus::NotStarted => "not_started",
            SwapStatus::Detected => "detected",
            SwapStatus::Initiated => "initiated",
            SwapStatus::Expired => "expired",
            SwapStatus::Redeemed => "redeemed",
            SwapStatus::Refunded => "refunded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [
            SwapStatus::NotStarted,
            SwapStatus::Detected,
            SwapStatus::Initiated,
            SwapStatus::Expired,
            SwapStatus::Redeemed,
            SwapStatus::Refunded,
        ]
        .into_iter()
        .find(|status| status.as_str() == s)
    }
}

/// One HTLC leg of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomicSwap {
    pub id: i64,
    pub chain: Chain,
    pub asset: Asset,
    /// Base units, decimal string.
    pub amount: String,
    pub filled_amount: String,
    pub initiator_address: String,
    pub redeemer_address: String,
    pub timelock: u64,
    pub status: SwapStatus,
    pub initiate_tx_hash: Option<String>,
    pub redeem_tx_hash: Option<String>,
    pub refund_tx_hash: Option<String>,
    pub current_confirmations: u64,
    pub minimum_confirmations: u64,
    pub price_by_oracle: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub maker: String,
    pub taker: Option<String>,
    pub order_pair: String,
    pub secret_hash: String,
    pub secret: Option<String>,
    pub price: f64,
    pub status: OrderStatus,
    pub initiator_atomic_swap: AtomicSwap,
    pub follower_atomic_swap: AtomicSwap,
    /// Unix seconds.
    pub created_at: i64,
    /// Unix seconds of the last status change.
    pub updated_at: i64,
}

impl Order {
    /// Change detection for subscribers. Only the status and the legs'
    /// confirmation counts and filled amounts count as observable.
    pub fn is_different(&self, other: &Order) -> bool {
        self.status != other.status
            || self.initiator_atomic_swap.current_confirmations
                != other.initiator_atomic_swap.current_confirmations
            || self.follower_atomic_swap.current_confirmations
                != other.follower_atomic_swap.current_confirmations
            || self.initiator_atomic_swap.filled_amount != other.initiator_atomic_swap.filled_amount
            || self.follower_atomic_swap.filled_amount != other.follower_atomic_swap.filled_amount
    }

    pub fn involves(&self, address: &str) -> bool {
        self.maker.eq_ignore_ascii_case(address)
            || self
                .taker
                .as_deref()
                .is_some_and(|taker| taker.eq_ignore_ascii_case(address))
    }
}

/// Validated input of `OrderStore::create_order`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    pub creator: String,
    pub send_address: String,
    pub receive_address: String,
    pub order_pair: String,
    pub send_amount: String,
    pub receive_amount: String,
    pub secret_hash: String,
}

pub fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

pub fn parse_amount(field: &str, value: &str) -> Result<u128, OrderError> {
    let amount: u128 = value
        .parse()
        .map_err(|_| OrderError::Validation(format!("{field} must be a base-unit integer: {value}")))?;
    if amount == 0 {
        return Err(OrderError::Validation(format!("{field} must be > 0")));
    }
    Ok(amount)
}

/// Secret hashes are hex-encoded SHA-256 digests.
pub fn validate_secret_hash(secret_hash: &str) -> Result<(), OrderError> {
    let bytes = hex::decode(secret_hash)
        .map_err(|e| OrderError::Validation(format!("invalid secret_hash: {e}")))?;
    if bytes.len() != 32 {
        return Err(OrderError::Validation(
            "secret_hash must be 32 bytes".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leg(confirmations: u64, filled: &str) -> AtomicSwap {
        AtomicSwap {
            id: 1,
            chain: Chain::BitcoinRegtest,
            asset: Asset::Primary,
            amount: "100".to_string(),
            filled_amount: filled.to_string(),
            initiator_address: String::new(),
            redeemer_address: String::new(),
            timelock: 0,
            status: SwapStatus::NotStarted,
            initiate_tx_hash: None,
            redeem_tx_hash: None,
            refund_tx_hash: None,
            current_confirmations: confirmations,
            minimum_confirmations: 1,
            price_by_oracle: 0.0,
        }
    }

    fn order(status: OrderStatus) -> Order {
        Order {
            id: 7,
            maker: "0xmaker".to_string(),
            taker: None,
            order_pair: "bitcoin_regtest:primary-ethereum_localnet:primary".to_string(),
            secret_hash: "00".repeat(32),
            secret: None,
            price: 0.5,
            status,
            initiator_atomic_swap: leg(0, "0"),
            follower_atomic_swap: leg(0, "0"),
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn change_detection_covers_observable_fields_only() {
        let base = order(OrderStatus::Filled);

        let mut other = base.clone();
        other.secret = Some("aa".to_string());
        other.initiator_atomic_swap.initiate_tx_hash = Some("tx".to_string());
        assert!(!base.is_different(&other));

        let mut other = base.clone();
        other.status = OrderStatus::InitiatorAtomicSwapInitiated;
        assert!(base.is_different(&other));

        let mut other = base.clone();
        other.follower_atomic_swap.current_confirmations = 3;
        assert!(base.is_different(&other));

        let mut other = base.clone();
        other.initiator_atomic_swap.filled_amount = "100".to_string();
        assert!(base.is_different(&other));
    }

    #[test]
    fn status_advances_one_stage_at_a_time() {
        use OrderStatus::*;
        assert!(Created.can_advance_to(Filled));
        assert!(Filled.can_advance_to(InitiatorAtomicSwapInitiated));
        assert!(!Filled.can_advance_to(FollowerAtomicSwapInitiated));
        assert!(!InitiatorAtomicSwapInitiated.can_advance_to(Filled));
        assert!(InitiatorAtomicSwapRedeemed.can_advance_to(Executed));
        assert!(!Executed.can_advance_to(FailedHard));
        assert!(Filled.can_advance_to(FailedSoft));
        assert!(Created.can_advance_to(Cancelled));
        assert!(!Filled.can_advance_to(Cancelled));
        assert!(Filled.can_advance_to(Filled));
    }

    #[test]
    fn active_predicate_is_explicit() {
        let active: Vec<_> = OrderStatus::ALL
            .into_iter()
            .filter(|s| s.is_active())
            .collect();
        assert_eq!(active.len(), 5);
        assert!(!OrderStatus::Created.is_active());
        assert!(!OrderStatus::Executed.is_active());
        assert!(!OrderStatus::FailedSoft.is_active());
    }

    #[test]
    fn status_strings_round_trip() {
        for status in OrderStatus::ALL {
            assert_eq!(OrderStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OrderStatus::parse("bogus"), None);
    }

    #[test]
    fn amounts_and_hashes_are_validated() {
        assert_eq!(parse_amount("send_amount", "100").unwrap(), 100);
        assert!(parse_amount("send_amount", "0").is_err());
        assert!(parse_amount("send_amount", "1.5").is_err());
        assert!(validate_secret_hash(&"ab".repeat(32)).is_ok());
        assert!(validate_secret_hash("abcd").is_err());
        assert!(validate_secret_hash(&"zz".repeat(32)).is_err());
    }
}
