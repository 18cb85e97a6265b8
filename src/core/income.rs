//! Income realization for a year's withdrawals: ordinary RRSP income, taxable
//! capital gains on non-registered sales, and pension income splitting.

use super::tax::personal_tax;
use super::types::{AccountWithdrawals, Person, Province};

pub const CAPITAL_GAINS_INCLUSION: f64 = 0.5;
pub const PENSION_SPLIT_MAX_SHARE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RealizedWithdrawal {
    /// Amounts actually taken after clamping to balances.
    pub withdrawn: AccountWithdrawals,
    pub taxable_income: f64,
}

/// Takes `planned` out of `person`'s accounts, capping every amount at the
/// available balance, and returns the taxable income it produced.
pub fn apply_withdrawals(person: &mut Person, planned: AccountWithdrawals) -> RealizedWithdrawal {
    let rrsp = planned.rrsp.min(person.rrsp).max(0.0);
    let tfsa = planned.tfsa.min(person.tfsa).max(0.0);
    let non_registered = planned.non_registered.min(person.non_registered).max(0.0);

    person.rrsp -= rrsp;
    person.tfsa -= tfsa;

    let mut taxable_income = rrsp;
    if non_registered > 0.0 {
        taxable_income += sell_non_registered(person, non_registered) * CAPITAL_GAINS_INCLUSION;
    }

    RealizedWithdrawal {
        withdrawn: AccountWithdrawals {
            rrsp,
            tfsa,
            non_registered,
        },
        taxable_income,
    }
}

/// Sells `amount` (already capped) and returns the realized gain.
fn sell_non_registered(person: &mut Person, amount: f64) -> f64 {
    let balance_before = person.non_registered;
    let basis_before = person.non_registered_cost_basis;
    let cost_ratio = person.cost_ratio();
    let fraction_sold = amount / balance_before;

    person.non_registered = (balance_before - amount).max(0.0);
    person.non_registered_cost_basis = (basis_before * (1.0 - fraction_sold))
        .max(0.0)
        .min(person.non_registered);

    amount * (1.0 - cost_ratio)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PensionSplit {
    pub incomes: [f64; 2],
    /// Amount moved from the higher-income person to the other; never negative.
    pub amount: f64,
}

/// Single-pass split: the person with the higher taxable income transfers
/// `min(half their RRSP withdrawal, half the income gap)` to the other.
pub fn split_pension_income(incomes: [f64; 2], rrsp_withdrawals: [f64; 2]) -> PensionSplit {
    let (from, to) = if incomes[0] >= incomes[1] { (0, 1) } else { (1, 0) };
    let gap = incomes[from] - incomes[to];
    let amount = (rrsp_withdrawals[from] * PENSION_SPLIT_MAX_SHARE)
        .min(gap / 2.0)
        .max(0.0);

    let mut after = incomes;
    after[from] -= amount;
    after[to] += amount;
    PensionSplit {
        incomes: after,
        amount,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HouseholdTax {
    pub incomes: [f64; 2],
    pub pension_split_amount: f64,
    pub total_tax: f64,
}

/// Household tax for realized withdrawals, splitting pension income first
/// when enabled.
pub fn household_tax(
    realized: &[RealizedWithdrawal; 2],
    pension_splitting: bool,
    province: Province,
) -> HouseholdTax {
    let incomes = [realized[0].taxable_income, realized[1].taxable_income];
    let split = if pension_splitting {
        split_pension_income(
            incomes,
            [realized[0].withdrawn.rrsp, realized[1].withdrawn.rrsp],
        )
    } else {
        PensionSplit {
            incomes,
            amount: 0.0,
        }
    };

    let total_tax = split
        .incomes
        .iter()
        .map(|income| personal_tax(*income, province))
        .sum();

    HouseholdTax {
        incomes: split.incomes,
        pension_split_amount: split.amount,
        total_tax,
    }
}
