pub mod args;
pub mod commands;

pub use args::{RunArgs, ShowArgs, StartArgs, ValidateArgs};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{name} {version}\n\
{about-with-newline}\n\
USAGE:\n    {usage}\n\
\nOPTIONS:\n{options}\n\
FLOW COMMANDS:\n{subcommands}\n";

#[derive(Parser, Debug)]
#[command(name = "clinic-flow")]
#[command(version = crate::VERSION)]
#[command(about = "Durable automation flows for clinic events")]
#[command(help_template = HELP_TEMPLATE)]
#[command(
    after_long_help = "Typical flow: start an execution from a template, run it until it waits, then resume it on timeout or response."
)]
pub struct Args {
    /// Workspace holding clinic-flow.toml, templates and execution state
    #[arg(long, global = true, default_value = ".", value_name = "DIR")]
    pub workspace: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(
        about = "Create an execution from a template",
        long_about = "Start records a new running execution positioned on the template's entry node and prints its id. It does not run any node.",
        after_help = "Example:\n    clinic-flow start --template lead_followup --trigger-type lead_created --entity-type lead_intake --entity-id 42 --clinic-id 7"
    )]
    Start(StartArgs),
    #[command(
        about = "Run or resume an execution",
        long_about = "Run walks the execution's graph until it completes, fails, suspends or exhausts its step budget, then prints the execution as JSON.",
        after_help = "Examples:\n    clinic-flow run 6f1c...\n    clinic-flow run 6f1c... --resume response --response-text \"Si, confirmo\""
    )]
    Run(RunArgs),
    #[command(
        about = "Print an execution and its node log",
        after_help = "Example:\n    clinic-flow show 6f1c..."
    )]
    Show(ShowArgs),
    #[command(
        about = "Check a template document for structural problems",
        after_help = "Example:\n    clinic-flow validate templates/lead_followup.yaml"
    )]
    Validate(ValidateArgs),
}

pub async fn run(args: Args) -> crate::Result<()> {
    let workspace = args.workspace;
    match args.command {
        Command::Start(start_args) => commands::start(&workspace, start_args).await,
        Command::Run(run_args) => commands::run(&workspace, run_args).await,
        Command::Show(show_args) => commands::show(&workspace, show_args).await,
        Command::Validate(validate_args) => commands::validate(validate_args).await,
    }
}
