//! Per-owner resource quota and the ledger operations that adjust it.
//!
//! A `Quota` is embedded in the record it gates (an app's unit count, a
//! user's app count) and is only ever mutated through [`reserve`] and
//! [`release`]. Both operations use the store's conditional-update primitive
//! so that concurrent callers — possibly in separate processes — cannot lose
//! updates or over-allocate: the persistent store is the arbiter, not an
//! in-process lock.

use serde::{Deserialize, Serialize};

use crate::error::{DrydockError, Result};
use crate::store::{Owner, Store};

// ---------------------------------------------------------------------------
// Quota
// ---------------------------------------------------------------------------

/// A cap and current usage count on a finite resource.
///
/// `limit: None` means unlimited. Invariant: `in_use <= limit` whenever a
/// limit is set. Never assign `in_use` directly — go through the ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quota {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default)]
    pub in_use: u32,
}

impl Quota {
    /// A quota capped at `limit` units with nothing in use.
    pub fn limited(limit: u32) -> Self {
        Self {
            limit: Some(limit),
            in_use: 0,
        }
    }

    /// An uncapped quota. Usage is still tracked.
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn is_unlimited(&self) -> bool {
        self.limit.is_none()
    }

    /// Remaining capacity, or `None` when unlimited.
    pub fn available(&self) -> Option<u32> {
        self.limit.map(|l| l.saturating_sub(self.in_use))
    }
}

// ---------------------------------------------------------------------------
// Ledger operations
// ---------------------------------------------------------------------------

/// Reserve `amount` units against `owner`'s quota.
///
/// Fails with `QuotaExceeded` (all-or-nothing — a partial grant is never
/// made) when the remaining capacity is smaller than `amount`. On a
/// conditional-update conflict the whole operation re-reads and retries:
/// conflicts are transient and resolve as soon as the winning write lands.
pub fn reserve(store: &dyn Store, owner: Owner<'_>, amount: u32) -> Result<()> {
    loop {
        let quota = store.quota_of(owner)?;
        let Some(limit) = quota.limit else {
            // No ceiling to race against; a plain atomic increment suffices.
            store.add_usage(owner, amount)?;
            return Ok(());
        };
        let available = limit.saturating_sub(quota.in_use);
        if amount > available {
            return Err(DrydockError::QuotaExceeded {
                requested: amount,
                available,
            });
        }
        if store.swap_usage(owner, quota.in_use, quota.in_use + amount)? {
            return Ok(());
        }
        // Lost the race; the winner's write is visible on the next read.
    }
}

/// Release `amount` previously-reserved units from `owner`'s quota.
///
/// Fails with `InsufficientReservation` when `amount` exceeds the current
/// usage, leaving the quota unchanged. Follows the same
/// conditional-update-with-retry discipline as [`reserve`].
pub fn release(store: &dyn Store, owner: Owner<'_>, amount: u32) -> Result<()> {
    loop {
        let quota = store.quota_of(owner)?;
        if amount > quota.in_use {
            return Err(DrydockError::InsufficientReservation);
        }
        if store.swap_usage(owner, quota.in_use, quota.in_use - amount)? {
            return Ok(());
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
