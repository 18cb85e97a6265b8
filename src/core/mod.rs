mod engine;
mod error;
mod income;
mod policy;
mod tax;
mod types;

pub use engine::{ESTIMATED_TAX_RATE, YearStepper, run_comparison, run_simulation};
pub use error::SimulationError;
pub use income::{HouseholdTax, PensionSplit, split_pension_income};
pub use policy::{
    RatioCandidate, WithdrawalDecision, decide, evaluate_ratio, ratio_grid, search_rrsp_ratio,
};
pub use tax::{oas_clawback, personal_tax, tax_for_income, tax_for_province_code};
pub use types::{
    AccountWithdrawals, ComparisonResult, ComparisonSummary, Household, Person, PlanSummary,
    Province, SimulationResult, SpendingGoal, Strategy, WithdrawalMix, WithdrawalPolicy, YearNote,
    YearRow,
};
