use std::fmt;
use std::str::FromStr;

use serde::Serialize;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize)]
pub enum Province {
    #[serde(rename = "ON")]
    Ontario,
    #[serde(rename = "BC")]
    BritishColumbia,
    #[serde(rename = "AB")]
    Alberta,
}

impl Province {
    pub const ALL: [Province; 3] = [
        Province::Ontario,
        Province::BritishColumbia,
        Province::Alberta,
    ];

    pub fn code(self) -> &'static str {
        match self {
            Province::Ontario => "ON",
            Province::BritishColumbia => "BC",
            Province::Alberta => "AB",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "ON" => Some(Province::Ontario),
            "BC" => Some(Province::BritishColumbia),
            "AB" => Some(Province::Alberta),
            _ => None,
        }
    }
}

impl FromStr for Province {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Province::from_code(s).ok_or_else(|| format!("unknown province code '{s}'"))
    }
}

impl fmt::Display for Province {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Account state for one household member.
#[derive(Copy, Clone, Debug, PartialEq, Default)]
pub struct Person {
    pub current_age: u32,
    pub rrsp: f64,
    pub tfsa: f64,
    pub non_registered: f64,
    pub non_registered_cost_basis: f64,
}

impl Person {
    pub fn total_assets(&self) -> f64 {
        self.rrsp + self.tfsa + self.non_registered
    }

    /// Share of the non-registered balance that is return of principal.
    pub fn cost_ratio(&self) -> f64 {
        if self.non_registered > 0.0 {
            (self.non_registered_cost_basis / self.non_registered).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "mode", content = "amount", rename_all = "camelCase")]
pub enum SpendingGoal {
    /// Spending required after household tax is paid.
    AfterTaxSpending(f64),
    /// Gross amount drawn from the accounts before tax.
    GrossWithdrawal(f64),
}

impl SpendingGoal {
    pub fn amount(self) -> f64 {
        match self {
            SpendingGoal::AfterTaxSpending(v) | SpendingGoal::GrossWithdrawal(v) => v,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Household {
    pub people: [Person; 2],
    pub retirement_age: u32,
    pub end_age: u32,
    pub goal: SpendingGoal,
    pub investment_return: f64,
    pub inflation_rate: f64,
    pub province: Province,
}

impl Household {
    pub fn total_assets(&self) -> f64 {
        self.people.iter().map(Person::total_assets).sum()
    }
}

/// Per-account withdrawal amounts for one person.
#[derive(Copy, Clone, Debug, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountWithdrawals {
    pub rrsp: f64,
    pub tfsa: f64,
    pub non_registered: f64,
}

impl AccountWithdrawals {
    pub fn total(&self) -> f64 {
        self.rrsp + self.tfsa + self.non_registered
    }
}

/// Percentage split of a target withdrawal across account types, in percent.
#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalMix {
    pub rrsp_pct: f64,
    pub non_registered_pct: f64,
    pub tfsa_pct: f64,
}

impl WithdrawalMix {
    /// Builds a mix whose tax-free share is the remainder of the other two.
    pub fn with_tfsa_remainder(rrsp_pct: f64, non_registered_pct: f64) -> Self {
        Self {
            rrsp_pct,
            non_registered_pct,
            tfsa_pct: 100.0 - rrsp_pct - non_registered_pct,
        }
    }

    pub fn total_pct(&self) -> f64 {
        self.rrsp_pct + self.non_registered_pct + self.tfsa_pct
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum WithdrawalPolicy {
    FixedAmounts([AccountWithdrawals; 2]),
    FixedMix(WithdrawalMix),
    TaxMinimizing,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Strategy {
    pub policy: WithdrawalPolicy,
    pub pension_splitting: bool,
}

impl Strategy {
    pub fn tax_minimizing() -> Self {
        Self {
            policy: WithdrawalPolicy::TaxMinimizing,
            pension_splitting: true,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum YearNote {
    #[default]
    None,
    AssetsDepleted,
}

impl YearNote {
    pub fn as_str(self) -> &'static str {
        match self {
            YearNote::None => "",
            YearNote::AssetsDepleted => "Assets Depleted",
        }
    }
}

impl Serialize for YearNote {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearRow {
    pub age: u32,
    pub start_assets: f64,
    pub target: f64,
    pub total_tax: f64,
    pub pension_split_amount: f64,
    pub mix: Option<WithdrawalMix>,
    pub end_assets: f64,
    pub total_withdrawn: f64,
    pub tfsa_top_up: f64,
    pub taxable_income: [f64; 2],
    pub notes: YearNote,
}

impl YearRow {
    pub fn depleted(age: u32) -> Self {
        Self {
            age,
            start_assets: 0.0,
            target: 0.0,
            total_tax: 0.0,
            pension_split_amount: 0.0,
            mix: None,
            end_assets: 0.0,
            total_withdrawn: 0.0,
            tfsa_top_up: 0.0,
            taxable_income: [0.0; 2],
            notes: YearNote::AssetsDepleted,
        }
    }

    pub fn is_depleted(&self) -> bool {
        self.notes == YearNote::AssetsDepleted
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub rows: Vec<YearRow>,
}

impl SimulationResult {
    /// `(age, end-of-year assets)` pairs for charting.
    pub fn asset_series(&self) -> Vec<(u32, f64)> {
        self.rows.iter().map(|r| (r.age, r.end_assets)).collect()
    }

    pub fn total_tax(&self) -> f64 {
        self.rows.iter().map(|r| r.total_tax).sum()
    }

    pub fn final_assets(&self) -> f64 {
        self.rows.last().map(|r| r.end_assets).unwrap_or(0.0)
    }

    pub fn depletion_age(&self) -> Option<u32> {
        self.rows.iter().find(|r| r.is_depleted()).map(|r| r.age)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSummary {
    pub total_tax: f64,
    pub final_assets: f64,
    pub depletion_age: Option<u32>,
}

impl From<&SimulationResult> for PlanSummary {
    fn from(result: &SimulationResult) -> Self {
        Self {
            total_tax: result.total_tax(),
            final_assets: result.final_assets(),
            depletion_age: result.depletion_age(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonSummary {
    pub selected: PlanSummary,
    pub optimized: PlanSummary,
    pub tax_saved: f64,
    pub extra_assets: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonResult {
    pub selected: SimulationResult,
    pub optimized: SimulationResult,
    pub summary: ComparisonSummary,
}
