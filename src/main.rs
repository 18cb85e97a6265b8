use clap::{Args, Parser, Subcommand};
use drawdown::api::{self, PlanArgs};
use drawdown::core::{PlanSummary, run_comparison, run_simulation};
use serde_json::json;

#[derive(Parser, Debug)]
#[command(name = "drawdown", about = "Two-person Canadian retirement drawdown simulator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the JSON API.
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Run one plan and print the year-by-year table.
    Simulate(SimulateArgs),
}

#[derive(Args, Debug)]
struct SimulateArgs {
    #[command(flatten)]
    plan: PlanArgs,
    #[arg(long, help = "Also run the tax-minimizing plan and print the difference")]
    compare: bool,
    #[arg(long, help = "Print JSON instead of a table")]
    json: bool,
}

fn simulate(args: SimulateArgs) -> Result<String, String> {
    let request = api::build_request(args.plan)?;

    if args.compare {
        let comparison =
            run_comparison(&request.household, &request.strategy).map_err(|e| e.to_string())?;
        if args.json {
            return serde_json::to_string_pretty(&comparison).map_err(|e| e.to_string());
        }
        return Ok(format!(
            "{}\n{}",
            api::render_table(&comparison.selected),
            api::render_comparison(&comparison.summary)
        ));
    }

    let result = run_simulation(&request.household, &request.strategy).map_err(|e| e.to_string())?;
    if args.json {
        let body = json!({
            "summary": PlanSummary::from(&result),
            "rows": result.rows,
        });
        return serde_json::to_string_pretty(&body).map_err(|e| e.to_string());
    }
    Ok(api::render_table(&result))
}

#[tokio::main]
async fn main() {
    env_logger::init();

    match Cli::parse().command {
        Command::Serve { port } => {
            if let Err(e) = api::run_http_server(port).await {
                eprintln!("Server error: {e}");
                std::process::exit(1);
            }
        }
        Command::Simulate(args) => match simulate(args) {
            Ok(output) => print!("{output}"),
            Err(e) => {
                eprintln!("error: {e}");
                std::process::exit(1);
            }
        },
    }
}
