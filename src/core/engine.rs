use log::{debug, info, warn};

use super::error::SimulationError;
use super::income::{apply_withdrawals, household_tax};
use super::policy::decide;
use super::types::{
    ComparisonResult, ComparisonSummary, Household, Person, PlanSummary, SimulationResult,
    SpendingGoal, Strategy, WithdrawalPolicy, YearNote, YearRow,
};

/// Tax rate assumed when grossing after-tax spending up to a withdrawal target.
pub const ESTIMATED_TAX_RATE: f64 = 0.20;

const MIX_TOLERANCE_PCT: f64 = 1e-6;

/// Advances a household through decumulation one year at a time, carrying
/// the inflating spending or withdrawal target between years.
#[derive(Debug)]
pub struct YearStepper<'a> {
    strategy: &'a Strategy,
    goal: SpendingGoal,
    target: f64,
}

impl<'a> YearStepper<'a> {
    pub fn new(goal: SpendingGoal, strategy: &'a Strategy) -> Self {
        Self {
            strategy,
            goal,
            target: goal.amount().max(0.0),
        }
    }

    /// This year's spending or withdrawal target in nominal dollars.
    pub fn target(&self) -> f64 {
        self.target
    }

    fn withdrawal_target(&self) -> f64 {
        match self.goal {
            SpendingGoal::AfterTaxSpending(_) => self.target / (1.0 - ESTIMATED_TAX_RATE),
            SpendingGoal::GrossWithdrawal(_) => self.target,
        }
    }

    /// Spending still unfunded once tax is paid, in either goal mode.
    fn shortfall(&self, withdrawn: f64, tax: f64) -> f64 {
        self.target - (withdrawn - tax)
    }

    /// Simulates one year in place. A depleted household yields the terminal
    /// row and is left untouched.
    pub fn step(&mut self, household: &mut Household, age: u32) -> YearRow {
        let start_assets = household.total_assets();
        if start_assets <= 0.0 {
            return YearRow::depleted(age);
        }

        let decision = decide(self.withdrawal_target(), household, self.strategy);

        let [first, second] = &mut household.people;
        let realized = [
            apply_withdrawals(first, decision.withdrawals[0]),
            apply_withdrawals(second, decision.withdrawals[1]),
        ];
        let tax = household_tax(&realized, self.strategy.pension_splitting, household.province);

        let mut total_withdrawn: f64 = realized.iter().map(|r| r.withdrawn.total()).sum();
        let tfsa_top_up = cover_shortfall(
            &mut household.people,
            self.shortfall(total_withdrawn, tax.total_tax),
        );
        total_withdrawn += tfsa_top_up;

        for person in &mut household.people {
            apply_growth(person, household.investment_return);
        }

        let row = YearRow {
            age,
            start_assets,
            target: self.target,
            total_tax: tax.total_tax,
            pension_split_amount: tax.pension_split_amount,
            mix: decision.mix,
            end_assets: household.total_assets(),
            total_withdrawn,
            tfsa_top_up,
            taxable_income: tax.incomes,
            notes: YearNote::None,
        };
        debug!(
            "age {age}: start={:.2} withdrawn={:.2} tax={:.2} split={:.2} end={:.2}",
            row.start_assets, row.total_withdrawn, row.total_tax, row.pension_split_amount, row.end_assets
        );

        self.target *= 1.0 + household.inflation_rate;
        row
    }
}

/// Draws `shortfall` from tax-free balances, first person first.
fn cover_shortfall(people: &mut [Person; 2], shortfall: f64) -> f64 {
    let mut remaining = shortfall;
    let mut drawn = 0.0;
    for person in people.iter_mut() {
        if remaining <= 0.0 {
            break;
        }
        let amount = remaining.min(person.tfsa);
        person.tfsa -= amount;
        remaining -= amount;
        drawn += amount;
    }
    drawn
}

/// Grows every balance by `rate`; the non-registered basis gains the same
/// absolute amount as its balance.
fn apply_growth(person: &mut Person, rate: f64) {
    let growth_factor = 1.0 + rate;
    let non_registered_growth = person.non_registered * rate;

    person.rrsp *= growth_factor;
    person.tfsa *= growth_factor;
    person.non_registered += non_registered_growth;
    if person.non_registered > 0.0 {
        person.non_registered_cost_basis = (person.non_registered_cost_basis
            + non_registered_growth)
            .clamp(0.0, person.non_registered);
    }
}

fn accumulation_years(household: &Household) -> Result<u32, SimulationError> {
    let current_age = household.people[0].current_age;
    household
        .retirement_age
        .checked_sub(current_age)
        .ok_or_else(|| {
            SimulationError::InvalidConfiguration(format!(
                "retirement age {} is before current age {current_age}",
                household.retirement_age
            ))
        })
}

fn validate(household: &Household, strategy: &Strategy) -> Result<(), SimulationError> {
    if household.end_age < household.retirement_age {
        return Err(SimulationError::InvalidConfiguration(format!(
            "end age {} is before retirement age {}",
            household.end_age, household.retirement_age
        )));
    }

    if let WithdrawalPolicy::FixedMix(mix) = &strategy.policy {
        let shares = [mix.rrsp_pct, mix.non_registered_pct, mix.tfsa_pct];
        if shares.iter().any(|pct| !(0.0..=100.0).contains(pct)) {
            return Err(SimulationError::InvalidConfiguration(
                "withdrawal mix percentages must each be between 0 and 100".to_string(),
            ));
        }
        if (mix.total_pct() - 100.0).abs() > MIX_TOLERANCE_PCT {
            return Err(SimulationError::InvalidConfiguration(format!(
                "withdrawal mix must sum to 100, got {}",
                mix.total_pct()
            )));
        }
    }

    Ok(())
}

/// Compounds every balance once per year before retirement.
fn accumulate(household: &mut Household, years: u32) {
    let growth_factor = (1.0 + household.investment_return).powi(years as i32);
    for person in &mut household.people {
        person.rrsp *= growth_factor;
        person.tfsa *= growth_factor;
        person.non_registered *= growth_factor;
    }
}

/// Runs one plan from today to `end_age`, leaving `household` untouched.
pub fn run_simulation(
    household: &Household,
    strategy: &Strategy,
) -> Result<SimulationResult, SimulationError> {
    validate(household, strategy)?;
    let years_to_retirement = accumulation_years(household)?;

    info!(
        "simulating {:?} (splitting={}) for ages {}..={} in {}",
        strategy.policy,
        strategy.pension_splitting,
        household.retirement_age,
        household.end_age,
        household.province
    );

    let mut state = household.clone();
    accumulate(&mut state, years_to_retirement);

    let mut stepper = YearStepper::new(state.goal, strategy);
    let mut rows = Vec::with_capacity((state.end_age - state.retirement_age + 1) as usize);
    for age in state.retirement_age..=state.end_age {
        let row = stepper.step(&mut state, age);
        let depleted = row.is_depleted();
        rows.push(row);
        if depleted {
            warn!("assets depleted at age {age}");
            break;
        }
    }

    let result = SimulationResult { rows };
    info!(
        "simulation finished: {} years, total tax {:.2}, final assets {:.2}",
        result.rows.len(),
        result.total_tax(),
        result.final_assets()
    );
    Ok(result)
}

/// Runs the caller's plan beside the tax-minimizing plan on independent
/// copies of the same household.
pub fn run_comparison(
    household: &Household,
    strategy: &Strategy,
) -> Result<ComparisonResult, SimulationError> {
    let optimized_strategy = Strategy::tax_minimizing();
    let (selected, optimized) = rayon::join(
        || run_simulation(household, strategy),
        || run_simulation(household, &optimized_strategy),
    );
    let selected = selected?;
    let optimized = optimized?;

    let selected_summary = PlanSummary::from(&selected);
    let optimized_summary = PlanSummary::from(&optimized);
    let summary = ComparisonSummary {
        tax_saved: selected_summary.total_tax - optimized_summary.total_tax,
        extra_assets: optimized_summary.final_assets - selected_summary.final_assets,
        selected: selected_summary,
        optimized: optimized_summary,
    };

    Ok(ComparisonResult {
        selected,
        optimized,
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{AccountWithdrawals, Province, WithdrawalMix};
    use proptest::prelude::{prop_assert, proptest};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn assert_approx_tol(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}, tolerance {tol}"
        );
    }

    fn person(age: u32, rrsp: f64, tfsa: f64, non_registered: f64, basis: f64) -> Person {
        Person {
            current_age: age,
            rrsp,
            tfsa,
            non_registered,
            non_registered_cost_basis: basis,
        }
    }

    fn rrsp_only_household() -> Household {
        Household {
            people: [
                person(65, 300_000.0, 0.0, 0.0, 0.0),
                person(65, 200_000.0, 0.0, 0.0, 0.0),
            ],
            retirement_age: 65,
            end_age: 95,
            goal: SpendingGoal::GrossWithdrawal(40_000.0),
            investment_return: 0.05,
            inflation_rate: 0.02,
            province: Province::Ontario,
        }
    }

    fn sample_household() -> Household {
        Household {
            people: [
                person(40, 300_000.0, 80_000.0, 50_000.0, 40_000.0),
                person(40, 200_000.0, 60_000.0, 20_000.0, 15_000.0),
            ],
            retirement_age: 65,
            end_age: 95,
            goal: SpendingGoal::AfterTaxSpending(60_000.0),
            investment_return: 0.05,
            inflation_rate: 0.02,
            province: Province::Ontario,
        }
    }

    fn no_withdrawals() -> Strategy {
        Strategy {
            policy: WithdrawalPolicy::FixedAmounts([AccountWithdrawals::default(); 2]),
            pension_splitting: false,
        }
    }

    #[test]
    fn zero_assets_at_retirement_yields_single_depleted_row() {
        let mut household = rrsp_only_household();
        household.people = [person(65, 0.0, 0.0, 0.0, 0.0); 2];

        let result = run_simulation(&household, &Strategy::tax_minimizing()).expect("valid");
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0].age, 65);
        assert_eq!(result.rows[0].notes.as_str(), "Assets Depleted");
        assert_eq!(result.depletion_age(), Some(65));
    }

    #[test]
    fn zero_withdrawal_year_conserves_assets_with_growth() {
        let mut household = sample_household();
        household.people[0].current_age = 65;
        household.people[1].current_age = 65;
        household.goal = SpendingGoal::GrossWithdrawal(0.0);

        let result = run_simulation(&household, &no_withdrawals()).expect("valid");
        let first = &result.rows[0];
        assert_approx(first.total_tax, 0.0);
        assert_approx(first.total_withdrawn, 0.0);
        assert_approx_tol(first.end_assets, first.start_assets * 1.05, 1e-6);
        assert_eq!(result.rows.len(), 31);
    }

    #[test]
    fn accumulation_compounds_before_first_row() {
        let mut household = sample_household();
        household.people[0].current_age = 60;
        household.goal = SpendingGoal::GrossWithdrawal(0.0);

        let result = run_simulation(&household, &no_withdrawals()).expect("valid");
        let expected = household.total_assets() * 1.05_f64.powi(5);
        assert_approx_tol(result.rows[0].start_assets, expected, 1e-6);
    }

    #[test]
    fn retirement_before_current_age_is_rejected() {
        let mut household = sample_household();
        household.people[0].current_age = 70;

        let err = run_simulation(&household, &Strategy::tax_minimizing()).expect_err("must reject");
        assert!(matches!(err, SimulationError::InvalidConfiguration(_)));
        assert!(err.to_string().contains("retirement age"));
    }

    #[test]
    fn end_age_before_retirement_is_rejected() {
        let mut household = sample_household();
        household.end_age = 60;
        let err = run_simulation(&household, &Strategy::tax_minimizing()).expect_err("must reject");
        assert!(err.to_string().contains("end age"));
    }

    #[test]
    fn mix_not_summing_to_hundred_is_rejected() {
        let strategy = Strategy {
            policy: WithdrawalPolicy::FixedMix(WithdrawalMix {
                rrsp_pct: 50.0,
                non_registered_pct: 30.0,
                tfsa_pct: 10.0,
            }),
            pension_splitting: true,
        };
        let err = run_simulation(&sample_household(), &strategy).expect_err("must reject");
        assert!(err.to_string().contains("sum to 100"));
    }

    #[test]
    fn caller_household_is_not_mutated() {
        let household = sample_household();
        let before = household.clone();
        let first = run_simulation(&household, &Strategy::tax_minimizing()).expect("valid");
        let second = run_simulation(&household, &Strategy::tax_minimizing()).expect("valid");
        assert_eq!(household, before);
        assert_eq!(first, second);
    }

    #[test]
    fn rrsp_only_couple_splits_pension_income_in_first_year() {
        let household = rrsp_only_household();
        let result = run_simulation(&household, &Strategy::tax_minimizing()).expect("valid");

        let first = &result.rows[0];
        assert_eq!(first.age, 65);
        assert_approx(first.target, 40_000.0);
        assert_approx(first.total_withdrawn, 40_000.0);
        assert_approx(first.pension_split_amount, 20_000.0);
        assert_approx(first.taxable_income[0], 20_000.0);
        assert_approx(first.taxable_income[1], 20_000.0);
        let per_person = 4_295.0 * 0.15 + 7_601.0 * 0.0505;
        assert_approx(first.total_tax, 2.0 * per_person);

        assert!(result.rows.len() <= 31);
        for (i, row) in result.rows.iter().enumerate() {
            assert_eq!(row.age, 65 + i as u32);
            if row.is_depleted() {
                assert_eq!(i, result.rows.len() - 1);
            }
        }
        for pair in result.rows[..10].windows(2) {
            assert!(pair[1].total_tax >= pair[0].total_tax);
            assert_approx_tol(pair[1].target, pair[0].target * 1.02, 1e-6);
        }
    }

    #[test]
    fn after_tax_goal_grosses_up_the_withdrawal() {
        let mut household = rrsp_only_household();
        household.goal = SpendingGoal::AfterTaxSpending(40_000.0);
        let result = run_simulation(&household, &Strategy::tax_minimizing()).expect("valid");
        let first = &result.rows[0];
        assert_approx(first.target, 40_000.0);
        assert_approx(first.total_withdrawn, 50_000.0);
    }

    #[test]
    fn shortfall_is_covered_from_tfsa_in_person_order() {
        let household = Household {
            people: [
                person(65, 0.0, 5_000.0, 0.0, 0.0),
                person(65, 0.0, 50_000.0, 0.0, 0.0),
            ],
            goal: SpendingGoal::AfterTaxSpending(20_000.0),
            ..rrsp_only_household()
        };
        let strategy = no_withdrawals();
        let mut state = household.clone();
        let mut stepper = YearStepper::new(state.goal, &strategy);
        let row = stepper.step(&mut state, 65);

        assert_approx(row.tfsa_top_up, 20_000.0);
        assert_approx(row.total_tax, 0.0);
        assert_approx(state.people[0].tfsa, 0.0);
        assert_approx(state.people[1].tfsa, 35_000.0 * 1.05);
        assert_approx(row.end_assets, 35_000.0 * 1.05);
    }

    #[test]
    fn gross_goal_tops_up_the_tax_from_tfsa() {
        let household = Household {
            people: [
                person(65, 300_000.0, 100_000.0, 0.0, 0.0),
                person(65, 0.0, 0.0, 0.0, 0.0),
            ],
            goal: SpendingGoal::GrossWithdrawal(40_000.0),
            ..rrsp_only_household()
        };
        let strategy = Strategy {
            policy: WithdrawalPolicy::FixedAmounts([
                AccountWithdrawals {
                    rrsp: 40_000.0,
                    ..Default::default()
                },
                AccountWithdrawals::default(),
            ]),
            pension_splitting: false,
        };
        let mut state = household.clone();
        let mut stepper = YearStepper::new(state.goal, &strategy);
        let row = stepper.step(&mut state, 65);

        assert!(row.total_tax > 0.0);
        assert_approx(row.tfsa_top_up, row.total_tax);
        assert_approx(row.total_withdrawn - row.total_tax, 40_000.0);
        assert_approx(state.people[0].tfsa, (100_000.0 - row.total_tax) * 1.05);
    }

    #[test]
    fn target_inflates_after_each_step() {
        let strategy = no_withdrawals();
        let mut state = rrsp_only_household();
        let mut stepper = YearStepper::new(state.goal, &strategy);
        assert_approx(stepper.target(), 40_000.0);

        stepper.step(&mut state, 65);
        assert_approx(stepper.target(), 40_800.0);
        stepper.step(&mut state, 66);
        assert_approx_tol(stepper.target(), 40_000.0 * 1.02 * 1.02, 1e-6);
    }

    #[test]
    fn manual_overdraw_is_capped_and_topped_up_from_tfsa() {
        let household = Household {
            people: [
                person(65, 10_000.0, 100_000.0, 0.0, 0.0),
                person(65, 0.0, 0.0, 0.0, 0.0),
            ],
            goal: SpendingGoal::GrossWithdrawal(50_000.0),
            ..rrsp_only_household()
        };
        let strategy = Strategy {
            policy: WithdrawalPolicy::FixedAmounts([
                AccountWithdrawals {
                    rrsp: 50_000.0,
                    ..Default::default()
                },
                AccountWithdrawals::default(),
            ]),
            pension_splitting: false,
        };
        let mut state = household.clone();
        let mut stepper = YearStepper::new(state.goal, &strategy);
        let row = stepper.step(&mut state, 65);

        assert_approx(state.people[0].rrsp, 0.0);
        assert_approx(row.taxable_income[0], 10_000.0);
        assert_approx(row.tfsa_top_up, 40_000.0);
        assert_approx(row.total_withdrawn, 50_000.0);
    }

    #[test]
    fn growth_adds_absolute_gain_to_cost_basis() {
        let household = Household {
            people: [
                person(65, 0.0, 0.0, 100.0, 50.0),
                person(65, 0.0, 0.0, 0.0, 0.0),
            ],
            goal: SpendingGoal::GrossWithdrawal(0.0),
            investment_return: 0.10,
            ..rrsp_only_household()
        };
        let strategy = no_withdrawals();
        let mut state = household.clone();
        YearStepper::new(state.goal, &strategy).step(&mut state, 65);
        assert_approx(state.people[0].non_registered, 110.0);
        assert_approx(state.people[0].non_registered_cost_basis, 60.0);
    }

    #[test]
    fn depleted_household_stops_early() {
        let household = Household {
            people: [
                person(65, 50_000.0, 0.0, 0.0, 0.0),
                person(65, 0.0, 0.0, 0.0, 0.0),
            ],
            investment_return: 0.0,
            inflation_rate: 0.0,
            ..rrsp_only_household()
        };
        let result = run_simulation(&household, &Strategy::tax_minimizing()).expect("valid");
        // 40k then the last 10k, then the terminal row.
        assert_eq!(result.rows.len(), 3);
        assert_approx(result.rows[1].end_assets, 0.0);
        assert!(result.rows[2].is_depleted());
        assert_eq!(result.depletion_age(), Some(67));
    }

    #[test]
    fn comparison_runs_are_isolated_and_summarized() {
        let household = sample_household();
        let manual = Strategy {
            policy: WithdrawalPolicy::FixedAmounts([
                AccountWithdrawals {
                    rrsp: 30_000.0,
                    ..Default::default()
                },
                AccountWithdrawals {
                    rrsp: 30_000.0,
                    ..Default::default()
                },
            ]),
            pension_splitting: true,
        };

        let comparison = run_comparison(&household, &manual).expect("valid");
        let selected = run_simulation(&household, &manual).expect("valid");
        let optimized = run_simulation(&household, &Strategy::tax_minimizing()).expect("valid");

        assert_eq!(comparison.selected, selected);
        assert_eq!(comparison.optimized, optimized);
        assert_approx_tol(
            comparison.summary.tax_saved,
            selected.total_tax() - optimized.total_tax(),
            1e-6,
        );
        assert_approx_tol(
            comparison.summary.extra_assets,
            optimized.final_assets() - selected.final_assets(),
            1e-6,
        );
        assert_eq!(
            comparison.optimized.asset_series().len(),
            comparison.optimized.rows.len()
        );
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(32))]

        #[test]
        fn prop_cost_basis_stays_within_balance(
            non_reg1 in 0u32..400_000,
            non_reg2 in 0u32..400_000,
            basis_pct1 in 0u32..101,
            basis_pct2 in 0u32..101,
            rrsp1 in 0u32..500_000,
            tfsa2 in 0u32..200_000,
            target in 0u32..120_000,
            return_bp in 0u32..1500,
            rrsp_mix in 0u32..101,
            use_search in proptest::bool::ANY,
        ) {
            let mut household = Household {
                people: [
                    person(65, rrsp1 as f64, 0.0, non_reg1 as f64, non_reg1 as f64 * basis_pct1 as f64 / 100.0),
                    person(65, 0.0, tfsa2 as f64, non_reg2 as f64, non_reg2 as f64 * basis_pct2 as f64 / 100.0),
                ],
                goal: SpendingGoal::AfterTaxSpending(target as f64),
                investment_return: return_bp as f64 / 10_000.0,
                ..rrsp_only_household()
            };
            let strategy = if use_search {
                Strategy::tax_minimizing()
            } else {
                Strategy {
                    policy: WithdrawalPolicy::FixedMix(WithdrawalMix::with_tfsa_remainder(
                        rrsp_mix as f64,
                        100.0 - rrsp_mix as f64,
                    )),
                    pension_splitting: true,
                }
            };

            let mut stepper = YearStepper::new(household.goal, &strategy);
            for age in 65..80 {
                let row = stepper.step(&mut household, age);
                for p in &household.people {
                    prop_assert!(p.non_registered_cost_basis >= 0.0);
                    prop_assert!(p.non_registered_cost_basis <= p.non_registered + 1e-9);
                    prop_assert!(p.rrsp >= 0.0 && p.tfsa >= 0.0 && p.non_registered >= 0.0);
                }
                prop_assert!(row.total_tax >= 0.0);
                if row.is_depleted() {
                    break;
                }
            }
        }
    }
}
