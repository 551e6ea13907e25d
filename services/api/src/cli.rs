use crate::demo::{run_demo, DemoArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use stayflow::error::AppError;
use stayflow::lifecycle::machines::MachineRegistry;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "Stayflow",
    about = "Run and demonstrate the stay lifecycle and access orchestration engine",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service and scheduler (default command)
    Serve(ServeArgs),
    /// Walk through the reference stay scenarios against an in-memory engine
    Demo(DemoArgs),
    /// Print every lifecycle transition table
    Machines(MachinesArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// Reservation CSV export to load before serving
    #[arg(long)]
    pub(crate) seed_csv: Option<PathBuf>,
}

#[derive(Args, Debug, Default)]
pub(crate) struct MachinesArgs {
    /// Emit the tables as JSON instead of text
    #[arg(long)]
    pub(crate) json: bool,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Demo(args) => run_demo(args).await,
        Command::Machines(args) => print_machines(args),
    }
}

fn print_machines(args: MachinesArgs) -> Result<(), AppError> {
    let registry = MachineRegistry::standard();
    if args.json {
        match serde_json::to_string_pretty(registry.tables()) {
            Ok(json) => println!("{}", json),
            Err(err) => return Err(AppError::Io(err.into())),
        }
        return Ok(());
    }

    for table in registry.tables() {
        println!("{}", table.machine);
        for edge in &table.edges {
            if edge.effects.is_empty() {
                println!("  {} --{}--> {}", edge.from, edge.on, edge.to);
            } else {
                println!(
                    "  {} --{}--> {}  [{}]",
                    edge.from,
                    edge.on,
                    edge.to,
                    edge.effects.join(", ")
                );
            }
        }
        println!();
    }
    Ok(())
}
