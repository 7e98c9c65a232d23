//! Frozen holds.
//!
//! A hold is a non-negative amount per principal that is subtracted from the
//! balance to give the available amount. It lives in the counter cache under
//! [`FROZEN_BUCKET`] and is independent of the entries.

use std::sync::Arc;

use rust_decimal::Decimal;
use tally_shared::types::round_money;
use tally_shared::{Money, Principal};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::cache::{CounterCache, FROZEN_BUCKET};
use super::error::LedgerError;

/// Freezes and releases held amounts.
#[derive(Debug)]
pub struct HoldManager<C> {
    cache: Arc<C>,
    max_retries: u32,
}

impl<C> Clone for HoldManager<C> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            max_retries: self.max_retries,
        }
    }
}

impl<C: CounterCache> HoldManager<C> {
    /// Creates a hold manager giving up after `max_retries` lost swaps.
    #[must_use]
    pub fn new(cache: Arc<C>, max_retries: u32) -> Self {
        Self {
            cache,
            max_retries: max_retries.max(1),
        }
    }

    /// Adds `amount` to the hold and returns the new total.
    ///
    /// # Errors
    ///
    /// Returns `NegativeAmount` for a negative amount, or a cache error.
    pub async fn freeze(&self, principal: &str, amount: Decimal, cancel: &CancellationToken) -> Result<Money, LedgerError> {
        let principal = Principal::parse(principal)?;
        let amount = non_negative(amount)?;
        if cancel.is_cancelled() {
            return Err(LedgerError::Cancelled);
        }

        let total = self.cache.increment(FROZEN_BUCKET, &principal, amount, None).await?;
        debug!(principal = %principal, %amount, %total, "Hold increased");
        Ok(Money::new(total))
    }

    /// Releases `amount` from the hold and returns what remains.
    ///
    /// A hold that reaches zero is removed.
    ///
    /// # Errors
    ///
    /// Returns `NegativeAmount` for a negative amount, `InsufficientHold` if
    /// the hold is smaller than `amount`, `ConcurrentModification` after too
    /// many lost swaps, or a cache error.
    pub async fn unfreeze(&self, principal: &str, amount: Decimal, cancel: &CancellationToken) -> Result<Money, LedgerError> {
        let principal = Principal::parse(principal)?;
        let amount = non_negative(amount)?;

        for _ in 0..self.max_retries {
            if cancel.is_cancelled() {
                return Err(LedgerError::Cancelled);
            }
            let current = self.cache.get(FROZEN_BUCKET, &principal).await?;
            let held = current.unwrap_or(Decimal::ZERO);
            let remaining = held - amount;
            if remaining < Decimal::ZERO {
                return Err(LedgerError::InsufficientHold {
                    requested: amount,
                    held,
                });
            }

            let replacement = (!remaining.is_zero()).then_some(remaining);
            if self
                .cache
                .compare_and_swap(FROZEN_BUCKET, &principal, current, replacement)
                .await?
            {
                debug!(principal = %principal, %amount, %remaining, "Hold released");
                return Ok(Money::new(remaining));
            }
        }

        warn!(principal = %principal, retries = self.max_retries, "Hold release lost every swap");
        Err(LedgerError::ConcurrentModification)
    }

    /// Removes the hold entirely.
    ///
    /// # Errors
    ///
    /// Returns a cache error.
    pub async fn unfreeze_all(&self, principal: &str, cancel: &CancellationToken) -> Result<(), LedgerError> {
        let principal = Principal::parse(principal)?;
        if cancel.is_cancelled() {
            return Err(LedgerError::Cancelled);
        }
        self.cache.delete(FROZEN_BUCKET, &principal).await?;
        debug!(principal = %principal, "Hold cleared");
        Ok(())
    }

    /// Current hold, zero when none.
    ///
    /// # Errors
    ///
    /// Returns a cache error.
    pub async fn frozen(&self, principal: &str) -> Result<Money, LedgerError> {
        let principal = Principal::parse(principal)?;
        self.frozen_of(&principal).await
    }

    pub(crate) async fn frozen_of(&self, principal: &Principal) -> Result<Money, LedgerError> {
        let held = self.cache.get(FROZEN_BUCKET, principal).await?;
        Ok(held.map(Money::new).unwrap_or_default())
    }
}

fn non_negative(amount: Decimal) -> Result<Decimal, LedgerError> {
    let amount = round_money(amount);
    if amount < Decimal::ZERO {
        return Err(LedgerError::NegativeAmount(amount));
    }
    Ok(amount)
}
