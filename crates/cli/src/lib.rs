pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "ledgerly",
    about = "Ledgerly operator CLI",
    long_about = "Operate Ledgerly tenant databases: migrations, reference seed data, config inspection, and readiness checks.",
    after_help = "Examples:\n  ledgerly migrate\n  ledgerly seed --tenant acme\n  ledgerly doctor --json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations to every configured tenant")]
    Migrate,
    #[command(
        about = "Load chart of accounts, journal settings and the super admin role into a tenant"
    )]
    Seed {
        #[arg(long, help = "Tenant key to seed (defaults to database.default_tenant)")]
        tenant: Option<String>,
    },
    #[command(about = "Print the effective configuration with source attribution as JSON")]
    Config,
    #[command(about = "Validate config and connectivity of every tenant database")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed { tenant } => commands::seed::run(tenant.as_deref()),
        Command::Config => commands::config::run(),
        Command::Doctor { json } => commands::doctor::run(json),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
