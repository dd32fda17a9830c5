//! casework - AI summaries, evaluation datasets and judge scoring for cases.
//!
//! Usage:
//!     casework case import cases.json
//!     casework summary generate CASE-2024-001
//!     casework dataset create --name "Summary Dataset" --operation generate_summary
//!     casework evaluate --operation generate_summary --output draft.txt
//!
//! State lives in a JSON snapshot (`--store`) that is loaded at start and
//! written back after commands that change it.

mod commands;
mod output;

use anyhow::Result;
use casework_core::Operation;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use uuid::Uuid;

use output::Format;

#[derive(Parser, Debug)]
#[command(name = "casework", version, about = "AI orchestration and evaluation for casework")]
struct Cli {
    /// Runtime configuration (YAML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// JSON store snapshot
    #[arg(long, global = true, default_value = "casework-store.json")]
    store: PathBuf,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = Format::Json)]
    format: Format,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage cases known to the store
    #[command(subcommand)]
    Case(CaseCommand),

    /// Generate, refresh and list AI summaries
    #[command(subcommand)]
    Summary(SummaryCommand),

    /// Check a case application for missing fields
    Completeness {
        case_id: String,
    },

    /// Manage evaluation datasets
    #[command(subcommand)]
    Dataset(DatasetCommand),

    /// Score an output with the judge model
    Evaluate {
        #[arg(long)]
        operation: Operation,

        /// File holding the output to score
        #[arg(long)]
        output: PathBuf,

        /// Rubric version (defaults to the configured one)
        #[arg(long)]
        rubric: Option<String>,

        /// File holding reference context
        #[arg(long)]
        reference: Option<PathBuf>,
    },

    /// List models available for evaluation
    Models,
}

#[derive(Subcommand, Debug)]
enum CaseCommand {
    /// Import one case or an array of cases from a JSON file
    Import { file: PathBuf },
}

#[derive(Subcommand, Debug)]
enum SummaryCommand {
    /// Generate a new overall summary version
    Generate { case_id: String },

    /// Generate a recommendation for one workflow step
    Step { case_id: String, step: String },

    /// Regenerate the overall summary
    Refresh { case_id: String },

    /// List summary versions, oldest first
    History {
        case_id: String,

        /// Step-specific history instead of the overall summary
        #[arg(long)]
        step: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum DatasetCommand {
    /// Create an empty dataset
    Create {
        #[arg(long)]
        name: String,

        #[arg(long)]
        operation: Operation,

        #[arg(long)]
        description: Option<String>,

        #[arg(long)]
        created_by: Option<String>,

        /// Tag; repeatable
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// easy, medium or hard
        #[arg(long)]
        difficulty: Option<String>,
    },

    /// List datasets
    List {
        #[arg(long)]
        operation: Option<Operation>,

        #[arg(long)]
        created_by: Option<String>,

        /// Matches datasets sharing any of these tags; repeatable
        #[arg(long = "tag")]
        tags: Vec<String>,

        #[arg(long)]
        limit: Option<usize>,

        #[arg(long)]
        offset: Option<usize>,
    },

    /// Show one dataset with its statistics
    Show { id: Uuid },

    /// Append an example read from a JSON file
    AddExample { id: Uuid, file: PathBuf },

    /// List a dataset's examples, newest first
    Examples { id: Uuid },
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "casework=info",
        1 => "casework=debug",
        _ => "casework=trace",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err:#}");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let ctx = commands::Context::load(cli.config.as_deref(), &cli.store, cli.format)?;

    match cli.command {
        Commands::Case(CaseCommand::Import { file }) => commands::import_cases(&ctx, &file),
        Commands::Summary(cmd) => match cmd {
            SummaryCommand::Generate { case_id } => commands::generate_summary(&ctx, &case_id).await,
            SummaryCommand::Step { case_id, step } => {
                commands::step_recommendation(&ctx, &case_id, &step).await
            }
            SummaryCommand::Refresh { case_id } => commands::refresh_summary(&ctx, &case_id).await,
            SummaryCommand::History { case_id, step } => {
                commands::summary_history(&ctx, &case_id, step.as_deref()).await
            }
        },
        Commands::Completeness { case_id } => commands::check_completeness(&ctx, &case_id).await,
        Commands::Dataset(cmd) => match cmd {
            DatasetCommand::Create {
                name,
                operation,
                description,
                created_by,
                tags,
                difficulty,
            } => {
                let new = commands::new_dataset(
                    name,
                    operation,
                    description,
                    created_by,
                    tags,
                    difficulty.as_deref(),
                )?;
                commands::create_dataset(&ctx, new).await
            }
            DatasetCommand::List {
                operation,
                created_by,
                tags,
                limit,
                offset,
            } => {
                let filter = casework_core::DatasetFilter {
                    operation,
                    created_by,
                    tags: tags.into_iter().collect(),
                    limit,
                    offset,
                };
                commands::list_datasets(&ctx, &filter).await
            }
            DatasetCommand::Show { id } => commands::show_dataset(&ctx, id).await,
            DatasetCommand::AddExample { id, file } => commands::add_example(&ctx, id, &file).await,
            DatasetCommand::Examples { id } => commands::dataset_examples(&ctx, id).await,
        },
        Commands::Evaluate {
            operation,
            output,
            rubric,
            reference,
        } => {
            commands::evaluate(&ctx, operation, &output, rubric.as_deref(), reference.as_deref())
                .await
        }
        Commands::Models => commands::models(&ctx).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_dataset_create() {
        let cli = Cli::try_parse_from([
            "casework",
            "dataset",
            "create",
            "--name",
            "Summary Dataset",
            "--operation",
            "generate_summary",
            "--tag",
            "housing",
            "--tag",
            "intake",
        ])
        .unwrap();

        match cli.command {
            Commands::Dataset(DatasetCommand::Create {
                name,
                operation,
                tags,
                ..
            }) => {
                assert_eq!(name, "Summary Dataset");
                assert_eq!(operation, Operation::GenerateSummary);
                assert_eq!(tags, vec!["housing", "intake"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_operation_rejected() {
        let result = Cli::try_parse_from([
            "casework",
            "evaluate",
            "--operation",
            "summarize_everything",
            "--output",
            "draft.txt",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "casework",
            "summary",
            "history",
            "c-1",
            "--format",
            "yaml",
            "-vv",
        ])
        .unwrap();
        assert_eq!(cli.format, Format::Yaml);
        assert_eq!(cli.verbose, 2);
    }
}
