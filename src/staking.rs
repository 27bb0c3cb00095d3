//! Staking engine — deterministic loss-doubling bet sizing.
//!
//! Pure and synchronous: converts (settings, staking state) into the next
//! stake and applies win/loss transitions. No I/O — persistence of the
//! resulting state belongs to the caller.

use rust_decimal::{Decimal, RoundingStrategy};
use tracing::debug;

use crate::types::{EngineError, Outcome, StakingState, TradingSettings};

// ---------------------------------------------------------------------------
// Stake computation
// ---------------------------------------------------------------------------

/// Compute the next stake for a user.
///
/// With martingale disabled the base amount is returned unchanged,
/// ignoring state. Otherwise:
///
/// `round2(min(max_amount, base_amount × multiplier^current_level))`
///
/// Rounding is half-away-from-zero to 2 decimals, applied after the cap
/// clamp. Structurally invalid settings fail the single computation with
/// `StakeComputation`; nothing is retried.
pub fn next_stake(
    settings: &TradingSettings,
    state: &StakingState,
) -> Result<Decimal, EngineError> {
    if settings.base_amount <= Decimal::ZERO {
        return Err(EngineError::StakeComputation(format!(
            "base amount must be positive, got {}",
            settings.base_amount,
        )));
    }

    if !settings.martingale_enabled {
        return Ok(settings.base_amount);
    }

    if settings.max_amount <= Decimal::ZERO {
        return Err(EngineError::StakeComputation(format!(
            "max amount must be positive, got {}",
            settings.max_amount,
        )));
    }
    if state.multiplier <= Decimal::ONE {
        return Err(EngineError::StakeComputation(format!(
            "multiplier must exceed 1, got {}",
            state.multiplier,
        )));
    }

    let amount = settings.base_amount * level_factor(state.multiplier, state.current_level);
    let clamped = amount.min(settings.max_amount);
    Ok(round2(clamped))
}

/// Apply a resolved outcome to the staking state, returning the new state.
///
/// Win → level 0, streak 0. Loss below the step cap → both increment by 1.
/// Loss at the cap → both reset to 0: a deliberate capital-preservation
/// rule, not saturation — the sequence is abandoned and sizing restarts
/// from the base amount.
pub fn apply_outcome(state: &StakingState, outcome: Outcome) -> StakingState {
    let mut next = state.clone();
    next.last_outcome = Some(outcome);

    match outcome {
        Outcome::Win => {
            next.current_level = 0;
            next.loss_streak = 0;
        }
        Outcome::Loss => {
            if state.current_level < state.max_steps {
                next.current_level = state.current_level + 1;
                next.loss_streak = state.loss_streak + 1;
            } else {
                debug!(
                    level = state.current_level,
                    max_steps = state.max_steps,
                    "Loss at step cap — abandoning sequence"
                );
                next.current_level = 0;
                next.loss_streak = 0;
            }
        }
    }

    next
}

// ---------------------------------------------------------------------------
// Status query
// ---------------------------------------------------------------------------

/// Snapshot of a user's staking position, for status queries.
#[derive(Debug, Clone, PartialEq)]
pub struct StakingStatus {
    pub current_level: u32,
    pub max_steps: u32,
    pub loss_streak: u32,
    /// Factor applied to the base amount at the current level.
    pub next_multiplier: Decimal,
    pub next_stake: Decimal,
}

impl std::fmt::Display for StakingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "level {}/{} streak {} next x{} next stake ${}",
            self.current_level, self.max_steps, self.loss_streak, self.next_multiplier, self.next_stake,
        )
    }
}

/// Current level / next multiplier / next stake for a user.
pub fn status(
    settings: &TradingSettings,
    state: &StakingState,
) -> Result<StakingStatus, EngineError> {
    let factor = if settings.martingale_enabled {
        level_factor(state.multiplier, state.current_level)
    } else {
        Decimal::ONE
    };
    Ok(StakingStatus {
        current_level: state.current_level,
        max_steps: state.max_steps,
        loss_streak: state.loss_streak,
        next_multiplier: factor,
        next_stake: next_stake(settings, state)?,
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// `multiplier^level` by repeated multiplication; levels are small (≤ max
/// steps), so this stays exact in decimal arithmetic.
fn level_factor(multiplier: Decimal, level: u32) -> Decimal {
    let mut factor = Decimal::ONE;
    for _ in 0..level {
        factor *= multiplier;
    }
    factor
}

fn round2(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn settings(base: Decimal, max: Decimal, martingale: bool) -> TradingSettings {
        TradingSettings {
            base_amount: base,
            max_amount: max,
            is_auto_trading: true,
            martingale_enabled: martingale,
            default_duration_secs: 300,
        }
    }

    fn state_at(level: u32) -> StakingState {
        StakingState {
            current_level: level,
            loss_streak: level,
            multiplier: dec!(2),
            max_steps: 6,
            last_outcome: None,
        }
    }

    // -- next_stake --

    #[test]
    fn test_level_zero_returns_base() {
        let stake = next_stake(&settings(dec!(10), dec!(1000), true), &state_at(0)).unwrap();
        assert_eq!(stake, dec!(10));
    }

    #[test]
    fn test_doubling_sequence() {
        // Four consecutive losses from level 0: stakes 10, 20, 40, 80.
        let cfg = settings(dec!(10), dec!(1000), true);
        let mut state = state_at(0);
        let mut stakes = Vec::new();
        for _ in 0..4 {
            stakes.push(next_stake(&cfg, &state).unwrap());
            state = apply_outcome(&state, Outcome::Loss);
        }
        assert_eq!(stakes, vec![dec!(10), dec!(20), dec!(40), dec!(80)]);

        // A win resets the next stake to the base amount.
        state = apply_outcome(&state, Outcome::Win);
        assert_eq!(next_stake(&cfg, &state).unwrap(), dec!(10));
    }

    #[test]
    fn test_cap_clamps_stake() {
        // 10 * 2^6 = 640 but cap is 500
        let stake = next_stake(&settings(dec!(10), dec!(500), true), &state_at(6)).unwrap();
        assert_eq!(stake, dec!(500));
    }

    #[test]
    fn test_stake_never_exceeds_cap() {
        let cfg = settings(dec!(7.33), dec!(100), true);
        for level in 0..=6 {
            let stake = next_stake(&cfg, &state_at(level)).unwrap();
            assert!(stake <= dec!(100), "level {level}: {stake}");
            assert!(stake > Decimal::ZERO);
        }
    }

    #[test]
    fn test_two_decimal_rounding() {
        // 1.11 * 2^3 = 8.88 — exact; 3.333 * 2 = 6.666 → 6.67
        let stake = next_stake(&settings(dec!(3.333), dec!(1000), true), &state_at(1)).unwrap();
        assert_eq!(stake, dec!(6.67));
        assert!(stake.scale() <= 2);
    }

    #[test]
    fn test_martingale_disabled_ignores_state() {
        let cfg = settings(dec!(25), dec!(1000), false);
        assert_eq!(next_stake(&cfg, &state_at(0)).unwrap(), dec!(25));
        assert_eq!(next_stake(&cfg, &state_at(5)).unwrap(), dec!(25));
    }

    #[test]
    fn test_invalid_base_amount_errors() {
        let err = next_stake(&settings(dec!(0), dec!(1000), true), &state_at(0)).unwrap_err();
        assert!(matches!(err, EngineError::StakeComputation(_)));
    }

    #[test]
    fn test_invalid_multiplier_errors() {
        let mut state = state_at(0);
        state.multiplier = dec!(1);
        let err = next_stake(&settings(dec!(10), dec!(1000), true), &state).unwrap_err();
        assert!(matches!(err, EngineError::StakeComputation(_)));
    }

    // -- apply_outcome --

    #[test]
    fn test_win_resets_from_any_level() {
        for level in [0, 1, 3, 6] {
            let next = apply_outcome(&state_at(level), Outcome::Win);
            assert_eq!(next.current_level, 0);
            assert_eq!(next.loss_streak, 0);
            assert_eq!(next.last_outcome, Some(Outcome::Win));
        }
    }

    #[test]
    fn test_loss_below_cap_increments_by_one() {
        for level in 0..6 {
            let next = apply_outcome(&state_at(level), Outcome::Loss);
            assert_eq!(next.current_level, level + 1);
            assert_eq!(next.loss_streak, level + 1);
            assert_eq!(next.last_outcome, Some(Outcome::Loss));
        }
    }

    #[test]
    fn test_loss_at_cap_resets_not_saturates() {
        let next = apply_outcome(&state_at(6), Outcome::Loss);
        assert_eq!(next.current_level, 0);
        assert_eq!(next.loss_streak, 0);
        assert_eq!(next.last_outcome, Some(Outcome::Loss));
    }

    #[test]
    fn test_level_never_exceeds_max_steps() {
        let mut state = state_at(0);
        for _ in 0..20 {
            state = apply_outcome(&state, Outcome::Loss);
            assert!(state.current_level <= state.max_steps);
        }
    }

    #[test]
    fn test_transition_preserves_configuration() {
        let next = apply_outcome(&state_at(2), Outcome::Loss);
        assert_eq!(next.multiplier, dec!(2));
        assert_eq!(next.max_steps, 6);
    }

    // -- status --

    #[test]
    fn test_status_query() {
        let cfg = settings(dec!(10), dec!(1000), true);
        let status = status(&cfg, &state_at(3)).unwrap();
        assert_eq!(status.current_level, 3);
        assert_eq!(status.next_multiplier, dec!(8));
        assert_eq!(status.next_stake, dec!(80));
    }

    #[test]
    fn test_status_with_martingale_disabled() {
        let cfg = settings(dec!(10), dec!(1000), false);
        let status = status(&cfg, &state_at(3)).unwrap();
        assert_eq!(status.next_multiplier, dec!(1));
        assert_eq!(status.next_stake, dec!(10));
    }

    #[test]
    fn test_status_display() {
        let cfg = settings(dec!(10), dec!(1000), true);
        let display = format!("{}", status(&cfg, &state_at(2)).unwrap());
        assert!(display.contains("level 2/6"));
        assert!(display.contains("$40"));
    }
}
