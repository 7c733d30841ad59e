pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "capflow",
    about = "Capflow operator CLI",
    long_about = "Operate Capflow migrations, config inspection, smoke validation, and approval chain lookups.",
    after_help = "Examples:\n  capflow migrate\n  capflow config\n  capflow versions DOC-1234\n  capflow inbox alice --unread-only"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Run end-to-end readiness checks with per-check timing details")]
    Smoke,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Print the version chain of a document, oldest version first")]
    Versions {
        #[arg(help = "Any document id in the chain")]
        document_id: String,
    },
    #[command(about = "List notifications delivered to a user, newest first")]
    Inbox {
        #[arg(help = "Recipient user id")]
        user_id: String,
        #[arg(long, help = "Only list unread notifications")]
        unread_only: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Smoke => commands::smoke::run(),
        Command::Config => commands::config::run(),
        Command::Versions { document_id } => commands::versions::run(&document_id),
        Command::Inbox { user_id, unread_only } => commands::inbox::run(&user_id, unread_only),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
