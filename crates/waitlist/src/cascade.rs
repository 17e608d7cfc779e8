//! Cascade Controller - keeps offering one freed slot until it is claimed
//! or nobody is left to take it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use waitlist_core::{Error, FreedSlot, GroupKey, Result, WaitlistEntry};

use crate::{
    keylock::KeyGuard,
    matcher::SlotMatcher,
    offer::{OfferAttempt, OfferManager},
};

/// Where a freed slot ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "entry", rename_all = "snake_case")]
pub enum CascadeOutcome {
    /// Offered to this entry.
    Offered(WaitlistEntry),
    /// No eligible entry; the slot returns to the open pool.
    Released,
    /// The slot already has an outstanding offer held by this entry.
    AlreadyOffered(WaitlistEntry),
    /// The cascade could not run; it stays pending and the sweep retries it.
    Deferred,
}

pub struct CascadeController {
    matcher: SlotMatcher,
    offers: Arc<OfferManager>,
}

impl CascadeController {
    pub fn new(matcher: SlotMatcher, offers: Arc<OfferManager>) -> Self {
        Self { matcher, offers }
    }

    /// Offer `slot` to the first eligible waiting entry, moving down the
    /// queue past any candidate whose offer cannot be created.
    ///
    /// Each failed candidate has normally left `waiting`, so the loop is
    /// bounded by the waiting population; the attempt cap enforces it. If the
    /// store reports another holder for the slot, the cascade stops there.
    pub async fn reoffer(
        &self,
        slot: &FreedSlot,
        guard: &KeyGuard<GroupKey>,
    ) -> Result<CascadeOutcome> {
        let max_attempts = self.matcher.waiting_count(&slot.group_key()).await? + 1;

        for _ in 0..max_attempts {
            let Some(candidate) = self.matcher.find_match(slot, guard).await? else {
                tracing::info!(slot = %slot, "No eligible entry, slot released");
                return Ok(CascadeOutcome::Released);
            };

            match self.offers.create_offer(&candidate, slot, guard).await {
                Ok(OfferAttempt::Offered(offered)) => return Ok(CascadeOutcome::Offered(offered)),
                Ok(OfferAttempt::SlotHeld(holder)) => {
                    return Ok(CascadeOutcome::AlreadyOffered(holder));
                }
                Err(e) if e.is_expected() || matches!(e, Error::NotFound(_)) => {
                    tracing::debug!(
                        entry_id = %candidate.id,
                        error = %e,
                        "Candidate lost before offer, trying next"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        tracing::warn!(slot = %slot, max_attempts, "Cascade attempts exhausted, slot released");
        Ok(CascadeOutcome::Released)
    }
}
