use super::types::Province;

pub const OAS_CLAWBACK_THRESHOLD: f64 = 90_997.0;
pub const OAS_CLAWBACK_RATE: f64 = 0.15;

#[derive(Debug, Clone, Copy)]
pub struct Bracket {
    pub rate: f64,
    /// Cumulative upper bound of taxable income taxed at `rate`.
    pub ceiling: f64,
}

#[derive(Debug)]
pub struct Jurisdiction {
    pub federal: &'static [Bracket],
    pub provincial: &'static [Bracket],
    pub federal_basic_amount: f64,
    pub provincial_basic_amount: f64,
}

const fn bracket(rate: f64, ceiling: f64) -> Bracket {
    Bracket { rate, ceiling }
}

const FEDERAL: [Bracket; 5] = [
    bracket(0.15, 55_867.0),
    bracket(0.205, 111_733.0),
    bracket(0.26, 173_205.0),
    bracket(0.29, 246_752.0),
    bracket(0.33, f64::INFINITY),
];

const FEDERAL_BASIC_AMOUNT: f64 = 15_705.0;

static ONTARIO: Jurisdiction = Jurisdiction {
    federal: &FEDERAL,
    provincial: &[
        bracket(0.0505, 51_446.0),
        bracket(0.0915, 102_894.0),
        bracket(0.1116, 150_000.0),
        bracket(0.1216, 220_000.0),
        bracket(0.1316, f64::INFINITY),
    ],
    federal_basic_amount: FEDERAL_BASIC_AMOUNT,
    provincial_basic_amount: 12_399.0,
};

static BRITISH_COLUMBIA: Jurisdiction = Jurisdiction {
    federal: &FEDERAL,
    provincial: &[
        bracket(0.0506, 47_937.0),
        bracket(0.077, 95_875.0),
        bracket(0.105, 110_070.0),
        bracket(0.1229, 133_664.0),
        bracket(0.147, 181_232.0),
        bracket(0.168, 252_752.0),
        bracket(0.205, f64::INFINITY),
    ],
    federal_basic_amount: FEDERAL_BASIC_AMOUNT,
    provincial_basic_amount: 12_580.0,
};

static ALBERTA: Jurisdiction = Jurisdiction {
    federal: &FEDERAL,
    provincial: &[
        bracket(0.10, 148_269.0),
        bracket(0.12, 177_922.0),
        bracket(0.13, 237_230.0),
        bracket(0.14, 355_845.0),
        bracket(0.15, f64::INFINITY),
    ],
    federal_basic_amount: FEDERAL_BASIC_AMOUNT,
    provincial_basic_amount: 21_885.0,
};

pub fn jurisdiction(province: Province) -> &'static Jurisdiction {
    match province {
        Province::Ontario => &ONTARIO,
        Province::BritishColumbia => &BRITISH_COLUMBIA,
        Province::Alberta => &ALBERTA,
    }
}

/// Combined federal and provincial income tax, before any OAS recovery.
pub fn tax_for_income(income: f64, province: Province) -> f64 {
    let table = jurisdiction(province);
    bracket_tax(income - table.federal_basic_amount, table.federal)
        + bracket_tax(income - table.provincial_basic_amount, table.provincial)
}

/// Same as [`tax_for_income`] keyed by province code; unknown codes pay nothing.
pub fn tax_for_province_code(income: f64, code: &str) -> f64 {
    Province::from_code(code)
        .map(|province| tax_for_income(income, province))
        .unwrap_or(0.0)
}

pub fn oas_clawback(income: f64) -> f64 {
    (income - OAS_CLAWBACK_THRESHOLD).max(0.0) * OAS_CLAWBACK_RATE
}

/// Income tax plus OAS recovery for one person.
pub fn personal_tax(income: f64, province: Province) -> f64 {
    tax_for_income(income, province) + oas_clawback(income)
}

fn bracket_tax(taxable_income: f64, brackets: &[Bracket]) -> f64 {
    let mut remaining = taxable_income.max(0.0);
    let mut previous_ceiling = 0.0;
    let mut tax = 0.0;

    for b in brackets {
        if remaining <= 0.0 {
            break;
        }
        let in_bracket = remaining.min(b.ceiling - previous_ceiling);
        tax += in_bracket * b.rate;
        remaining -= in_bracket;
        previous_ceiling = b.ceiling;
    }

    tax
}
