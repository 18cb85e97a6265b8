use log::debug;

use super::income::{RealizedWithdrawal, apply_withdrawals, household_tax};
use super::types::{AccountWithdrawals, Household, Person, Strategy, WithdrawalMix, WithdrawalPolicy};

pub const RATIO_GRID_STEP_PCT: u32 = 5;
pub const RATIO_GRID_POINTS: u32 = 100 / RATIO_GRID_STEP_PCT + 1;

const UNCOVERED_TOLERANCE: f64 = 0.005;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WithdrawalDecision {
    pub withdrawals: [AccountWithdrawals; 2],
    pub mix: Option<WithdrawalMix>,
}

/// One evaluated point of the RRSP-versus-non-registered grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatioCandidate {
    pub rrsp_ratio: f64,
    /// Part of the target the household balances cannot supply at this ratio.
    pub uncovered: f64,
    pub household_tax: f64,
}

impl RatioCandidate {
    /// Coverage ranks ahead of tax, or the search would always leave RRSPs untouched.
    fn beats(&self, best: &RatioCandidate) -> bool {
        if self.uncovered < best.uncovered - UNCOVERED_TOLERANCE {
            return true;
        }
        (self.uncovered - best.uncovered).abs() <= UNCOVERED_TOLERANCE
            && self.household_tax < best.household_tax
    }
}

/// Decides this year's per-person per-account withdrawals for `target`.
pub fn decide(target: f64, household: &Household, strategy: &Strategy) -> WithdrawalDecision {
    let target = target.max(0.0);
    match &strategy.policy {
        WithdrawalPolicy::FixedAmounts(amounts) => WithdrawalDecision {
            withdrawals: *amounts,
            mix: None,
        },
        WithdrawalPolicy::FixedMix(mix) => WithdrawalDecision {
            withdrawals: fixed_mix_withdrawals(target, mix),
            mix: Some(*mix),
        },
        WithdrawalPolicy::TaxMinimizing => {
            let best = search_rrsp_ratio(target, household, strategy.pension_splitting);
            debug!(
                "tax-minimizing search: target={target:.2} ratio={:.2} tax={:.2} uncovered={:.2}",
                best.rrsp_ratio, best.household_tax, best.uncovered
            );
            let rrsp_pct = best.rrsp_ratio * 100.0;
            WithdrawalDecision {
                withdrawals: apply_ratio(target, best.rrsp_ratio, &household.people),
                mix: Some(WithdrawalMix {
                    rrsp_pct,
                    non_registered_pct: 100.0 - rrsp_pct,
                    tfsa_pct: 0.0,
                }),
            }
        }
    }
}

/// Each account type receives `target * pct`, shared evenly by both people.
pub fn fixed_mix_withdrawals(target: f64, mix: &WithdrawalMix) -> [AccountWithdrawals; 2] {
    let per_person = AccountWithdrawals {
        rrsp: target * mix.rrsp_pct / 100.0 / 2.0,
        tfsa: target * mix.tfsa_pct / 100.0 / 2.0,
        non_registered: target * mix.non_registered_pct / 100.0 / 2.0,
    };
    [per_person, per_person]
}

pub fn ratio_grid() -> impl Iterator<Item = f64> {
    (0..RATIO_GRID_POINTS).map(|i| f64::from(i * RATIO_GRID_STEP_PCT) / 100.0)
}

/// Scores one grid ratio against a symmetric 50/50 split of `target`.
pub fn evaluate_ratio(
    target: f64,
    rrsp_ratio: f64,
    household: &Household,
    pension_splitting: bool,
) -> RatioCandidate {
    let rrsp_total = target * rrsp_ratio;
    let non_registered_total = target - rrsp_total;
    let per_person = AccountWithdrawals {
        rrsp: rrsp_total / 2.0,
        tfsa: 0.0,
        non_registered: non_registered_total / 2.0,
    };

    let realized: [RealizedWithdrawal; 2] = household.people.map(|person| {
        let mut scratch = person;
        apply_withdrawals(&mut scratch, per_person)
    });
    let tax = household_tax(&realized, pension_splitting, household.province);

    let available_rrsp: f64 = household.people.iter().map(|p| p.rrsp).sum();
    let available_non_registered: f64 = household.people.iter().map(|p| p.non_registered).sum();
    let uncovered = (rrsp_total - available_rrsp).max(0.0)
        + (non_registered_total - available_non_registered).max(0.0);

    RatioCandidate {
        rrsp_ratio,
        uncovered,
        household_tax: tax.total_tax,
    }
}

/// Scans the ratio grid from 0% upward and keeps the first best candidate.
pub fn search_rrsp_ratio(target: f64, household: &Household, pension_splitting: bool) -> RatioCandidate {
    let mut grid = ratio_grid().map(|r| evaluate_ratio(target, r, household, pension_splitting));
    let mut best = grid
        .next()
        .unwrap_or_else(|| evaluate_ratio(target, 0.0, household, pension_splitting));
    for candidate in grid {
        if candidate.beats(&best) {
            best = candidate;
        }
    }
    best
}

/// Turns a ratio into concrete amounts: RRSP comes from the larger RRSP
/// first, non-registered is split evenly up to each balance.
pub fn apply_ratio(target: f64, rrsp_ratio: f64, people: &[Person; 2]) -> [AccountWithdrawals; 2] {
    let mut withdrawals = [AccountWithdrawals::default(); 2];

    let order = if people[1].rrsp > people[0].rrsp { [1, 0] } else { [0, 1] };
    let mut remaining_rrsp = target * rrsp_ratio;
    for idx in order {
        if remaining_rrsp <= 0.0 {
            break;
        }
        let amount = remaining_rrsp.min(people[idx].rrsp);
        withdrawals[idx].rrsp = amount;
        remaining_rrsp -= amount;
    }

    let non_registered_each = target * (1.0 - rrsp_ratio) / 2.0;
    for (w, person) in withdrawals.iter_mut().zip(people) {
        w.non_registered = non_registered_each.min(person.non_registered);
    }

    withdrawals
}
