use axum::{
    Router,
    extract::{Json, Query},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use clap::{Args, ValueEnum};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::TcpListener;

use crate::core::{
    AccountWithdrawals, ComparisonSummary, Household, Person, PlanSummary, Province,
    SimulationResult, SpendingGoal, Strategy, WithdrawalMix, WithdrawalPolicy, YearRow,
    run_comparison, run_simulation,
};

const MIX_TOLERANCE_PCT: f64 = 1e-6;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlanMode {
    #[serde(alias = "auto", alias = "optimized")]
    Automatic,
    Manual,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SimulatePayload {
    person1_current_age: Option<u32>,
    person1_rrsp: Option<f64>,
    person1_tfsa: Option<f64>,
    person1_non_registered: Option<f64>,
    person1_cost_basis: Option<f64>,
    person2_current_age: Option<u32>,
    person2_rrsp: Option<f64>,
    person2_tfsa: Option<f64>,
    person2_non_registered: Option<f64>,
    person2_cost_basis: Option<f64>,

    retirement_age: Option<u32>,
    end_age: Option<u32>,
    annual_spending: Option<f64>,
    annual_withdrawal: Option<f64>,
    investment_return: Option<f64>,
    inflation_rate: Option<f64>,
    province: Option<String>,

    mode: Option<PlanMode>,
    pension_splitting: Option<bool>,
    person1_rrsp_withdrawal: Option<f64>,
    person1_non_registered_withdrawal: Option<f64>,
    person1_tfsa_withdrawal: Option<f64>,
    person2_rrsp_withdrawal: Option<f64>,
    person2_non_registered_withdrawal: Option<f64>,
    person2_tfsa_withdrawal: Option<f64>,
    rrsp_mix_pct: Option<f64>,
    non_registered_mix_pct: Option<f64>,
    tfsa_mix_pct: Option<f64>,
}

/// Household, goal and strategy flags shared by the CLI and the HTTP API.
#[derive(Args, Debug, Clone)]
pub struct PlanArgs {
    #[arg(long, default_value_t = 40)]
    pub person1_current_age: u32,
    #[arg(long, default_value_t = 300_000.0, help = "RRSP/RRIF balance")]
    pub person1_rrsp: f64,
    #[arg(long, default_value_t = 80_000.0, help = "TFSA balance")]
    pub person1_tfsa: f64,
    #[arg(long, default_value_t = 50_000.0)]
    pub person1_non_registered: f64,
    #[arg(long, default_value_t = 40_000.0, help = "Non-registered adjusted cost base")]
    pub person1_cost_basis: f64,
    #[arg(long, default_value_t = 40)]
    pub person2_current_age: u32,
    #[arg(long, default_value_t = 200_000.0)]
    pub person2_rrsp: f64,
    #[arg(long, default_value_t = 60_000.0)]
    pub person2_tfsa: f64,
    #[arg(long, default_value_t = 20_000.0)]
    pub person2_non_registered: f64,
    #[arg(long, default_value_t = 15_000.0)]
    pub person2_cost_basis: f64,
    #[arg(long, default_value_t = 65)]
    pub retirement_age: u32,
    #[arg(long, default_value_t = 95, help = "Age the plan must fund through")]
    pub end_age: u32,
    #[arg(
        long,
        help = "After-tax annual spending in today's dollars; defaults to 60000 when no withdrawal is given"
    )]
    pub annual_spending: Option<f64>,
    #[arg(
        long,
        conflicts_with = "annual_spending",
        help = "Gross annual withdrawal target in today's dollars"
    )]
    pub annual_withdrawal: Option<f64>,
    #[arg(long, default_value_t = 5.0, help = "Annual investment return in percent")]
    pub investment_return: f64,
    #[arg(long, default_value_t = 2.0, help = "Annual inflation in percent")]
    pub inflation_rate: f64,
    #[arg(long, default_value = "ON", help = "Province of residence: ON, BC or AB")]
    pub province: String,
    #[arg(long, value_enum, default_value_t = PlanMode::Automatic)]
    pub mode: PlanMode,
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub pension_splitting: bool,
    #[arg(long, default_value_t = 30_000.0, help = "Manual plan: RRSP withdrawal for person 1")]
    pub person1_rrsp_withdrawal: f64,
    #[arg(long, default_value_t = 0.0)]
    pub person1_non_registered_withdrawal: f64,
    #[arg(long, default_value_t = 0.0)]
    pub person1_tfsa_withdrawal: f64,
    #[arg(long, default_value_t = 30_000.0)]
    pub person2_rrsp_withdrawal: f64,
    #[arg(long, default_value_t = 0.0)]
    pub person2_non_registered_withdrawal: f64,
    #[arg(long, default_value_t = 0.0)]
    pub person2_tfsa_withdrawal: f64,
    #[arg(
        long,
        help = "Manual plan: share of the target from RRSP in percent; switches to a percentage mix"
    )]
    pub rrsp_mix_pct: Option<f64>,
    #[arg(long, help = "Manual plan: share of the target from non-registered in percent")]
    pub non_registered_mix_pct: Option<f64>,
    #[arg(
        long,
        help = "Manual plan: share of the target from TFSA in percent; defaults to the remainder"
    )]
    pub tfsa_mix_pct: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub household: Household,
    pub strategy: Strategy,
    pub mode: PlanMode,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
struct AssetPoint {
    age: u32,
    end_assets: f64,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
struct ComparisonPoint {
    age: u32,
    selected: Option<f64>,
    optimized: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulateResponse {
    mode: PlanMode,
    pension_splitting: bool,
    province: Province,
    summary: PlanSummary,
    asset_series: Vec<AssetPoint>,
    rows: Vec<YearRow>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CompareResponse {
    mode: PlanMode,
    province: Province,
    summary: ComparisonSummary,
    chart: Vec<ComparisonPoint>,
    selected_rows: Vec<YearRow>,
    optimized_rows: Vec<YearRow>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn check_range<T: PartialOrd + std::fmt::Display>(
    value: T,
    min: T,
    max: T,
    flag: &str,
) -> Result<(), String> {
    if value < min || value > max {
        return Err(format!("{flag} must be between {min} and {max}"));
    }
    Ok(())
}

fn check_non_negative(value: f64, flag: &str) -> Result<(), String> {
    if !value.is_finite() || value < 0.0 {
        return Err(format!("{flag} must be >= 0"));
    }
    Ok(())
}

fn build_person(
    current_age: u32,
    rrsp: f64,
    tfsa: f64,
    non_registered: f64,
    cost_basis: f64,
    prefix: &str,
) -> Result<Person, String> {
    check_range(current_age, 20, 100, &format!("--{prefix}-current-age"))?;
    check_non_negative(rrsp, &format!("--{prefix}-rrsp"))?;
    check_non_negative(tfsa, &format!("--{prefix}-tfsa"))?;
    check_non_negative(non_registered, &format!("--{prefix}-non-registered"))?;
    check_non_negative(cost_basis, &format!("--{prefix}-cost-basis"))?;
    if cost_basis > non_registered {
        return Err(format!(
            "--{prefix}-cost-basis must be <= --{prefix}-non-registered"
        ));
    }

    Ok(Person {
        current_age,
        rrsp,
        tfsa,
        non_registered,
        non_registered_cost_basis: cost_basis,
    })
}

fn build_manual_policy(args: &PlanArgs) -> Result<WithdrawalPolicy, String> {
    if args.rrsp_mix_pct.is_some()
        || args.non_registered_mix_pct.is_some()
        || args.tfsa_mix_pct.is_some()
    {
        let rrsp_pct = args.rrsp_mix_pct.unwrap_or(0.0);
        let non_registered_pct = args.non_registered_mix_pct.unwrap_or(0.0);
        let mix = match args.tfsa_mix_pct {
            Some(tfsa_pct) => WithdrawalMix {
                rrsp_pct,
                non_registered_pct,
                tfsa_pct,
            },
            None => WithdrawalMix::with_tfsa_remainder(rrsp_pct, non_registered_pct),
        };
        check_range(mix.rrsp_pct, 0.0, 100.0, "--rrsp-mix-pct")?;
        check_range(mix.non_registered_pct, 0.0, 100.0, "--non-registered-mix-pct")?;
        check_range(mix.tfsa_pct, 0.0, 100.0, "--tfsa-mix-pct")?;
        if (mix.total_pct() - 100.0).abs() > MIX_TOLERANCE_PCT {
            return Err("withdrawal mix percentages must sum to 100".to_string());
        }
        return Ok(WithdrawalPolicy::FixedMix(mix));
    }

    let amounts = [
        (args.person1_rrsp_withdrawal, "--person1-rrsp-withdrawal"),
        (
            args.person1_non_registered_withdrawal,
            "--person1-non-registered-withdrawal",
        ),
        (args.person1_tfsa_withdrawal, "--person1-tfsa-withdrawal"),
        (args.person2_rrsp_withdrawal, "--person2-rrsp-withdrawal"),
        (
            args.person2_non_registered_withdrawal,
            "--person2-non-registered-withdrawal",
        ),
        (args.person2_tfsa_withdrawal, "--person2-tfsa-withdrawal"),
    ];
    for (value, flag) in amounts {
        check_non_negative(value, flag)?;
    }

    Ok(WithdrawalPolicy::FixedAmounts([
        AccountWithdrawals {
            rrsp: args.person1_rrsp_withdrawal,
            tfsa: args.person1_tfsa_withdrawal,
            non_registered: args.person1_non_registered_withdrawal,
        },
        AccountWithdrawals {
            rrsp: args.person2_rrsp_withdrawal,
            tfsa: args.person2_tfsa_withdrawal,
            non_registered: args.person2_non_registered_withdrawal,
        },
    ]))
}

pub fn build_request(args: PlanArgs) -> Result<PlanRequest, String> {
    let person1 = build_person(
        args.person1_current_age,
        args.person1_rrsp,
        args.person1_tfsa,
        args.person1_non_registered,
        args.person1_cost_basis,
        "person1",
    )?;
    let person2 = build_person(
        args.person2_current_age,
        args.person2_rrsp,
        args.person2_tfsa,
        args.person2_non_registered,
        args.person2_cost_basis,
        "person2",
    )?;

    check_range(args.retirement_age, 40, 80, "--retirement-age")?;
    check_range(args.end_age, 70, 120, "--end-age")?;
    for (person, flag) in [
        (&person1, "--person1-current-age"),
        (&person2, "--person2-current-age"),
    ] {
        if args.retirement_age < person.current_age {
            return Err(format!("--retirement-age must be >= {flag}"));
        }
    }
    if args.end_age < args.retirement_age {
        return Err("--end-age must be >= --retirement-age".to_string());
    }

    check_range(args.investment_return, 0.0, 15.0, "--investment-return")?;
    check_range(args.inflation_rate, 0.0, 10.0, "--inflation-rate")?;

    let goal = match (args.annual_spending, args.annual_withdrawal) {
        (Some(_), Some(_)) => {
            return Err(
                "--annual-spending and --annual-withdrawal are mutually exclusive".to_string(),
            );
        }
        (Some(spending), None) => {
            check_non_negative(spending, "--annual-spending")?;
            SpendingGoal::AfterTaxSpending(spending)
        }
        (None, Some(withdrawal)) => {
            check_non_negative(withdrawal, "--annual-withdrawal")?;
            SpendingGoal::GrossWithdrawal(withdrawal)
        }
        (None, None) => SpendingGoal::AfterTaxSpending(60_000.0),
    };

    let province = Province::from_code(&args.province)
        .ok_or_else(|| "--province must be one of ON, BC, AB".to_string())?;

    let policy = match args.mode {
        PlanMode::Automatic => WithdrawalPolicy::TaxMinimizing,
        PlanMode::Manual => build_manual_policy(&args)?,
    };

    Ok(PlanRequest {
        household: Household {
            people: [person1, person2],
            retirement_age: args.retirement_age,
            end_age: args.end_age,
            goal,
            investment_return: args.investment_return / 100.0,
            inflation_rate: args.inflation_rate / 100.0,
            province,
        },
        strategy: Strategy {
            policy,
            pension_splitting: args.pension_splitting,
        },
        mode: args.mode,
    })
}

pub fn default_plan_args() -> PlanArgs {
    PlanArgs {
        person1_current_age: 40,
        person1_rrsp: 300_000.0,
        person1_tfsa: 80_000.0,
        person1_non_registered: 50_000.0,
        person1_cost_basis: 40_000.0,
        person2_current_age: 40,
        person2_rrsp: 200_000.0,
        person2_tfsa: 60_000.0,
        person2_non_registered: 20_000.0,
        person2_cost_basis: 15_000.0,
        retirement_age: 65,
        end_age: 95,
        annual_spending: None,
        annual_withdrawal: None,
        investment_return: 5.0,
        inflation_rate: 2.0,
        province: "ON".to_string(),
        mode: PlanMode::Automatic,
        pension_splitting: true,
        person1_rrsp_withdrawal: 30_000.0,
        person1_non_registered_withdrawal: 0.0,
        person1_tfsa_withdrawal: 0.0,
        person2_rrsp_withdrawal: 30_000.0,
        person2_non_registered_withdrawal: 0.0,
        person2_tfsa_withdrawal: 0.0,
        rrsp_mix_pct: None,
        non_registered_mix_pct: None,
        tfsa_mix_pct: None,
    }
}

pub fn render_table(result: &SimulationResult) -> String {
    let mut out = format!(
        "{:>4} {:>14} {:>12} {:>12} {:>12} {:>14} {:>14}  Notes\n",
        "Age", "Start assets", "Target", "Tax", "Split", "Withdrawn", "End assets"
    );
    out.push_str(&"-".repeat(100));
    out.push('\n');
    for row in &result.rows {
        out.push_str(&format!(
            "{:>4} {:>14.0} {:>12.0} {:>12.0} {:>12.0} {:>14.0} {:>14.0}  {}\n",
            row.age,
            row.start_assets,
            row.target,
            row.total_tax,
            row.pension_split_amount,
            row.total_withdrawn,
            row.end_assets,
            row.notes.as_str()
        ));
    }
    out
}

pub fn render_comparison(summary: &ComparisonSummary) -> String {
    let mut out = String::new();
    for (label, plan) in [("My plan", &summary.selected), ("Optimized", &summary.optimized)] {
        let outcome = match plan.depletion_age {
            Some(age) => format!("assets depleted at age {age}"),
            None => format!("${:.0} remaining", plan.final_assets),
        };
        out.push_str(&format!(
            "{label:<10} total tax ${:.0}, {outcome}\n",
            plan.total_tax
        ));
    }
    out.push_str(&format!(
        "Optimization saves ${:.0} in tax and leaves ${:.0} more in assets\n",
        summary.tax_saved, summary.extra_assets
    ));
    out
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = Router::new()
        .route("/health", get(health_handler))
        .route(
            "/api/simulate",
            get(simulate_get_handler).post(simulate_post_handler),
        )
        .route(
            "/api/compare",
            get(compare_get_handler).post(compare_post_handler),
        )
        .fallback(not_found_handler);

    let listener = TcpListener::bind(addr).await?;
    info!("drawdown HTTP API listening on http://{addr}");

    axum::serve(listener, app).await
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn simulate_get_handler(Query(payload): Query<SimulatePayload>) -> Response {
    simulate_handler_impl(payload)
}

async fn simulate_post_handler(Json(payload): Json<SimulatePayload>) -> Response {
    simulate_handler_impl(payload)
}

async fn compare_get_handler(Query(payload): Query<SimulatePayload>) -> Response {
    compare_handler_impl(payload)
}

async fn compare_post_handler(Json(payload): Json<SimulatePayload>) -> Response {
    compare_handler_impl(payload)
}

fn simulate_handler_impl(payload: SimulatePayload) -> Response {
    let request = match plan_request_from_payload(payload) {
        Ok(request) => request,
        Err(msg) => {
            warn!("rejected simulate request: {msg}");
            return error_response(StatusCode::BAD_REQUEST, &msg);
        }
    };

    match run_simulation(&request.household, &request.strategy) {
        Ok(result) => json_response(StatusCode::OK, build_simulate_response(&request, result)),
        Err(e) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    }
}

fn compare_handler_impl(payload: SimulatePayload) -> Response {
    let request = match plan_request_from_payload(payload) {
        Ok(request) => request,
        Err(msg) => {
            warn!("rejected compare request: {msg}");
            return error_response(StatusCode::BAD_REQUEST, &msg);
        }
    };

    match run_comparison(&request.household, &request.strategy) {
        Ok(comparison) => {
            let chart = comparison_chart(&comparison.selected, &comparison.optimized);
            json_response(
                StatusCode::OK,
                CompareResponse {
                    mode: request.mode,
                    province: request.household.province,
                    summary: comparison.summary,
                    chart,
                    selected_rows: comparison.selected.rows,
                    optimized_rows: comparison.optimized.rows,
                },
            )
        }
        Err(e) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    }
}

fn build_simulate_response(request: &PlanRequest, result: SimulationResult) -> SimulateResponse {
    SimulateResponse {
        mode: request.mode,
        pension_splitting: request.strategy.pension_splitting,
        province: request.household.province,
        summary: PlanSummary::from(&result),
        asset_series: result
            .asset_series()
            .into_iter()
            .map(|(age, end_assets)| AssetPoint { age, end_assets })
            .collect(),
        rows: result.rows,
    }
}

/// Joins both runs on age; a run that depleted early has no value later on.
fn comparison_chart(selected: &SimulationResult, optimized: &SimulationResult) -> Vec<ComparisonPoint> {
    let first_age = selected
        .rows
        .first()
        .or(optimized.rows.first())
        .map(|r| r.age);
    let last_age = selected
        .rows
        .last()
        .map(|r| r.age)
        .max(optimized.rows.last().map(|r| r.age));
    let (Some(first_age), Some(last_age)) = (first_age, last_age) else {
        return Vec::new();
    };

    let end_assets_at = |result: &SimulationResult, age: u32| {
        result
            .rows
            .iter()
            .find(|r| r.age == age)
            .map(|r| r.end_assets)
    };
    (first_age..=last_age)
        .map(|age| ComparisonPoint {
            age,
            selected: end_assets_at(selected, age),
            optimized: end_assets_at(optimized, age),
        })
        .collect()
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
fn plan_request_from_json(json: &str) -> Result<PlanRequest, String> {
    let payload = serde_json::from_str::<SimulatePayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    plan_request_from_payload(payload)
}

fn plan_request_from_payload(payload: SimulatePayload) -> Result<PlanRequest, String> {
    let mut args = default_plan_args();

    if let Some(v) = payload.person1_current_age {
        args.person1_current_age = v;
    }
    if let Some(v) = payload.person1_rrsp {
        args.person1_rrsp = v;
    }
    if let Some(v) = payload.person1_tfsa {
        args.person1_tfsa = v;
    }
    if let Some(v) = payload.person1_non_registered {
        args.person1_non_registered = v;
    }
    if let Some(v) = payload.person1_cost_basis {
        args.person1_cost_basis = v;
    }
    if let Some(v) = payload.person2_current_age {
        args.person2_current_age = v;
    }
    if let Some(v) = payload.person2_rrsp {
        args.person2_rrsp = v;
    }
    if let Some(v) = payload.person2_tfsa {
        args.person2_tfsa = v;
    }
    if let Some(v) = payload.person2_non_registered {
        args.person2_non_registered = v;
    }
    if let Some(v) = payload.person2_cost_basis {
        args.person2_cost_basis = v;
    }
    if let Some(v) = payload.retirement_age {
        args.retirement_age = v;
    }
    if let Some(v) = payload.end_age {
        args.end_age = v;
    }
    args.annual_spending = payload.annual_spending;
    args.annual_withdrawal = payload.annual_withdrawal;
    if let Some(v) = payload.investment_return {
        args.investment_return = v;
    }
    if let Some(v) = payload.inflation_rate {
        args.inflation_rate = v;
    }
    if let Some(v) = payload.province {
        args.province = v;
    }
    if let Some(v) = payload.mode {
        args.mode = v;
    }
    if let Some(v) = payload.pension_splitting {
        args.pension_splitting = v;
    }
    if let Some(v) = payload.person1_rrsp_withdrawal {
        args.person1_rrsp_withdrawal = v;
    }
    if let Some(v) = payload.person1_non_registered_withdrawal {
        args.person1_non_registered_withdrawal = v;
    }
    if let Some(v) = payload.person1_tfsa_withdrawal {
        args.person1_tfsa_withdrawal = v;
    }
    if let Some(v) = payload.person2_rrsp_withdrawal {
        args.person2_rrsp_withdrawal = v;
    }
    if let Some(v) = payload.person2_non_registered_withdrawal {
        args.person2_non_registered_withdrawal = v;
    }
    if let Some(v) = payload.person2_tfsa_withdrawal {
        args.person2_tfsa_withdrawal = v;
    }
    args.rrsp_mix_pct = payload.rrsp_mix_pct;
    args.non_registered_mix_pct = payload.non_registered_mix_pct;
    args.tfsa_mix_pct = payload.tfsa_mix_pct;

    build_request(args)
}
