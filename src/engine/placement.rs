//! Placement protocol.
//!
//! Drives one trade onto a surface as a fixed 3-step sequence: set stake,
//! set expiry, commit direction. Each step walks an ordered list of
//! fallback locator strategies — venue markup drifts, so no single
//! selector is trusted — and the first strategy to resolve within the
//! per-attempt budget wins.
//!
//! The expiry step is best-effort: the venue preselects a default expiry,
//! so a missing expiry control degrades to that default instead of
//! aborting. The direction step is the actual commit and is required.

use rust_decimal::Decimal;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::VenueConfig;
use crate::surface::Surface;
use crate::types::{Direction, EngineError, PlacementStep, Signal};

/// Executes the 3-step placement sequence against one surface.
pub struct PlacementProtocol {
    selectors: crate::config::SelectorConfig,
    locator_timeout: Duration,
    venue_default_duration_secs: u32,
}

impl PlacementProtocol {
    pub fn new(venue: &VenueConfig) -> Self {
        Self {
            selectors: venue.selectors.clone(),
            locator_timeout: Duration::from_millis(venue.locator_timeout_ms),
            venue_default_duration_secs: venue.default_duration_secs,
        }
    }

    /// Place one trade: stake → expiry → direction, strictly in order.
    pub async fn execute(
        &self,
        surface: &dyn Surface,
        signal: &Signal,
        stake: Decimal,
    ) -> Result<(), EngineError> {
        self.set_stake(surface, stake).await?;

        if signal.duration_secs != self.venue_default_duration_secs {
            if let Err(e) = self.set_expiry(surface, signal.duration_secs).await {
                warn!(
                    duration_secs = signal.duration_secs,
                    error = %e,
                    "Expiry control not found — falling back to venue default"
                );
            }
        }

        self.commit_direction(surface, signal.direction).await
    }

    /// Step 1: focus the amount field, clear it, type the stake, commit.
    /// Also used on its own for best-effort settings sync.
    pub async fn set_stake(
        &self,
        surface: &dyn Surface,
        amount: Decimal,
    ) -> Result<(), EngineError> {
        let text = amount.to_string();
        for selector in &self.selectors.amount {
            match surface.fill(selector, &text, self.locator_timeout).await {
                Ok(()) => {
                    debug!(selector = %selector, amount = %text, "Stake set");
                    return Ok(());
                }
                Err(e) => debug!(selector = %selector, error = %e, "Stake strategy missed"),
            }
        }
        Err(EngineError::LocatorNotFound {
            step: PlacementStep::Stake,
            strategies: self.selectors.amount.len(),
        })
    }

    /// Step 2: click the expiry control matching the signal's duration.
    async fn set_expiry(
        &self,
        surface: &dyn Surface,
        duration_secs: u32,
    ) -> Result<(), EngineError> {
        let seconds = duration_secs.to_string();
        for template in &self.selectors.expiry {
            let selector = template.replace("{seconds}", &seconds);
            match surface.click(&selector, self.locator_timeout).await {
                Ok(()) => {
                    debug!(selector = %selector, "Expiry set");
                    return Ok(());
                }
                Err(e) => debug!(selector = %selector, error = %e, "Expiry strategy missed"),
            }
        }
        Err(EngineError::LocatorNotFound {
            step: PlacementStep::Expiry,
            strategies: self.selectors.expiry.len(),
        })
    }

    /// Step 3: click the call/put control. This commits the trade.
    async fn commit_direction(
        &self,
        surface: &dyn Surface,
        direction: Direction,
    ) -> Result<(), EngineError> {
        let strategies = match direction {
            Direction::Call => &self.selectors.call,
            Direction::Put => &self.selectors.put,
        };
        for selector in strategies {
            match surface.click(selector, self.locator_timeout).await {
                Ok(()) => {
                    debug!(selector = %selector, direction = %direction, "Direction committed");
                    return Ok(());
                }
                Err(e) => debug!(selector = %selector, error = %e, "Direction strategy missed"),
            }
        }
        Err(EngineError::PlacementAborted {
            step: PlacementStep::Direction,
            reason: format!(
                "{direction} control not found after {} strategies",
                strategies.len(),
            ),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
