// =============================================================================
// billing.rs — TAKING THE MONEY (OR PRETENDING TO)
// =============================================================================
//
// Settlement asks one question of billing: "did charging this fare work?"
// The answer is a plain bool, synchronously. No retries, no idempotency
// keys; a real billing integration will need both and is not this module.
//
// The default collaborator is a stub that always says yes, which is what
// the platform does today. The mobility-pass seam is here too: a ledger
// trait with balance lookup and debit, and a billing adapter that charges
// a rider's pass. Only `BILLING_MODE=pass` wires it in.
// =============================================================================

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[async_trait]
pub trait BillingCollaborator: Send + Sync {
    /// Charge `amount` for a trip. `true` means the fare was collected.
    async fn charge(&self, trip_id: Uuid, rider_id: Uuid, amount: Decimal) -> bool;
}

/// Always collects. Logs what it would have debited.
#[derive(Debug, Default)]
pub struct StubBilling;

#[async_trait]
impl BillingCollaborator for StubBilling {
    async fn charge(&self, trip_id: Uuid, rider_id: Uuid, amount: Decimal) -> bool {
        info!(
            trip_id = %trip_id,
            rider_id = %rider_id,
            amount = %amount,
            "[BILLING-STUB] Debit accepted"
        );
        true
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PassError {
    #[error("rider {0} has no mobility pass")]
    NoPass(Uuid),
    #[error("insufficient balance: {balance} available, {requested} requested")]
    InsufficientBalance { balance: Decimal, requested: Decimal },
    #[error("debit amount must not be negative, got {0}")]
    InvalidAmount(Decimal),
}

/// Stored-value mobility pass, addressed by rider.
#[async_trait]
pub trait MobilityPassLedger: Send + Sync {
    async fn balance(&self, rider_id: Uuid) -> Result<Decimal, PassError>;

    /// Debit the pass. Returns the remaining balance.
    async fn debit(&self, rider_id: Uuid, amount: Decimal) -> Result<Decimal, PassError>;
}

/// In-process ledger. Riders seen for the first time get a pass holding
/// `opening_balance` when one is configured.
pub struct InMemoryPassLedger {
    balances: Mutex<HashMap<Uuid, Decimal>>,
    opening_balance: Option<Decimal>,
}

impl InMemoryPassLedger {
    pub fn new(opening_balance: Option<Decimal>) -> Self {
        Self {
            balances: Mutex::new(HashMap::new()),
            opening_balance,
        }
    }

    pub fn open_pass(&self, rider_id: Uuid, balance: Decimal) {
        self.balances.lock().insert(rider_id, balance);
    }
}

#[async_trait]
impl MobilityPassLedger for InMemoryPassLedger {
    async fn balance(&self, rider_id: Uuid) -> Result<Decimal, PassError> {
        let balances = self.balances.lock();
        balances
            .get(&rider_id)
            .copied()
            .or(self.opening_balance)
            .ok_or(PassError::NoPass(rider_id))
    }

    async fn debit(&self, rider_id: Uuid, amount: Decimal) -> Result<Decimal, PassError> {
        if amount < Decimal::ZERO {
            return Err(PassError::InvalidAmount(amount));
        }
        let mut balances = self.balances.lock();
        let balance = match balances.get(&rider_id) {
            Some(balance) => *balance,
            None => self.opening_balance.ok_or(PassError::NoPass(rider_id))?,
        };
        if balance < amount {
            return Err(PassError::InsufficientBalance {
                balance,
                requested: amount,
            });
        }
        let remaining = balance - amount;
        balances.insert(rider_id, remaining);
        Ok(remaining)
    }
}

/// Billing by debiting the rider's mobility pass.
pub struct PassDebitBilling {
    ledger: Arc<dyn MobilityPassLedger>,
}

impl PassDebitBilling {
    pub fn new(ledger: Arc<dyn MobilityPassLedger>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl BillingCollaborator for PassDebitBilling {
    async fn charge(&self, trip_id: Uuid, rider_id: Uuid, amount: Decimal) -> bool {
        match self.ledger.debit(rider_id, amount).await {
            Ok(remaining) => {
                info!(
                    trip_id = %trip_id,
                    rider_id = %rider_id,
                    amount = %amount,
                    remaining = %remaining,
                    "Pass debited"
                );
                true
            }
            Err(e) => {
                warn!(trip_id = %trip_id, rider_id = %rider_id, error = %e, "Pass debit refused");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_stub_always_collects() {
        let billing = StubBilling;
        assert!(billing.charge(Uuid::new_v4(), Uuid::new_v4(), dec!(1200)).await);
        assert!(billing.charge(Uuid::new_v4(), Uuid::new_v4(), dec!(0)).await);
    }

    #[tokio::test]
    async fn test_ledger_debits_until_empty() {
        let ledger = InMemoryPassLedger::new(None);
        let rider = Uuid::new_v4();
        ledger.open_pass(rider, dec!(1500));

        assert_eq!(ledger.debit(rider, dec!(1000)).await, Ok(dec!(500)));
        assert_eq!(
            ledger.debit(rider, dec!(600)).await,
            Err(PassError::InsufficientBalance {
                balance: dec!(500),
                requested: dec!(600)
            })
        );
        assert_eq!(ledger.balance(rider).await, Ok(dec!(500)));
    }

    #[tokio::test]
    async fn test_unknown_rider_without_opening_balance() {
        let ledger = InMemoryPassLedger::new(None);
        let rider = Uuid::new_v4();
        assert_eq!(ledger.balance(rider).await, Err(PassError::NoPass(rider)));
        assert_eq!(ledger.debit(rider, dec!(1)).await, Err(PassError::NoPass(rider)));
    }

    #[tokio::test]
    async fn test_opening_balance_for_new_riders() {
        let ledger = InMemoryPassLedger::new(Some(dec!(2000)));
        let rider = Uuid::new_v4();
        assert_eq!(ledger.balance(rider).await, Ok(dec!(2000)));
        assert_eq!(ledger.debit(rider, dec!(750)).await, Ok(dec!(1250)));
        assert_eq!(ledger.balance(rider).await, Ok(dec!(1250)));
    }

    #[tokio::test]
    async fn test_pass_billing_reports_refusal_as_false() {
        let ledger = Arc::new(InMemoryPassLedger::new(None));
        let rider = Uuid::new_v4();
        ledger.open_pass(rider, dec!(1000));
        let billing = PassDebitBilling::new(ledger.clone());

        assert!(billing.charge(Uuid::new_v4(), rider, dec!(800)).await);
        assert!(!billing.charge(Uuid::new_v4(), rider, dec!(800)).await);
        assert!(!billing.charge(Uuid::new_v4(), Uuid::new_v4(), dec!(1)).await);
    }

    #[tokio::test]
    async fn test_zero_debit_is_allowed_negative_is_not() {
        let ledger = InMemoryPassLedger::new(None);
        let rider = Uuid::new_v4();
        ledger.open_pass(rider, dec!(300));

        assert_eq!(ledger.debit(rider, dec!(0)).await, Ok(dec!(300)));

        let refused = ledger.debit(rider, dec!(-50)).await.unwrap_err();
        assert_eq!(refused, PassError::InvalidAmount(dec!(-50)));
        assert_eq!(refused.to_string(), "debit amount must not be negative, got -50");
        assert_eq!(ledger.balance(rider).await, Ok(dec!(300)));
    }
}
