//! # Summary RAG CLI (`srag`)
//!
//! Ask questions about a codebase through its generated file summaries.
//!
//! ## Usage
//!
//! ```bash
//! srag --config ./config/srag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `srag init <dir>` | Embed a summaries directory and save its state |
//! | `srag query <dir> "<question>"` | Answer one question and exit |
//! | `srag chat` | Pick a model and a summary run, then ask questions interactively |
//! | `srag list` | List summary runs under a summaries root |
//!
//! Questions accept filters: `@components: ...` limits results to a
//! category of directories, `#file_type:.py` to an exact metadata value.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use summary_rag::config::{self, Config};
use summary_rag::llm::create_model;
use summary_rag::progress::ProgressMode;
use summary_rag::session::{model_for_choice, ChatInput, Session, MODEL_MENU};
use summary_rag::summaries::{find_summary_directories, SummaryRun};
use summary_rag::{InitReport, KbError, KnowledgeBase};
use summary_rag_core::models::QueryAnswer;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

/// Summary RAG: question answering over generated code summaries.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file means built-in defaults (OpenAI, gpt-3.5-turbo).
#[derive(Parser)]
#[command(
    name = "srag",
    about = "Question answering over a directory of generated code summaries",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/srag.toml")]
    config: PathBuf,

    /// Chat model to answer with. Overrides `llm.chat_model`.
    #[arg(long, global = true)]
    model: Option<String>,

    /// Progress output on stderr. Defaults to `human` on a terminal.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Off,
    Human,
    Json,
}

impl From<ProgressArg> for ProgressMode {
    fn from(arg: ProgressArg) -> Self {
        match arg {
            ProgressArg::Off => ProgressMode::Off,
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Embed a summaries directory and save its state.
    ///
    /// Unchanged directories load from saved state without any embedding
    /// calls; changed ones are rebuilt, reusing cached vectors.
    Init {
        /// Directory containing summary markdown files.
        dir: PathBuf,
    },

    /// Answer a single question and exit.
    Query {
        /// Directory containing summary markdown files.
        dir: PathBuf,
        /// The question, optionally with `@category:` and `#key:value` filters.
        question: String,
    },

    /// Interactive question loop.
    ///
    /// Without `--dir`, lists the `summary_*` runs under `--root` and asks
    /// which one to load. Without `--model`, asks which model to use.
    Chat {
        /// Root holding `summary_<timestamp>` run directories.
        #[arg(long, default_value = "./summaries")]
        root: PathBuf,
        /// Load this directory directly instead of choosing a run.
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// List summary runs, newest first.
    List {
        /// Root holding `summary_<timestamp>` run directories.
        #[arg(default_value = "./summaries")]
        root: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let progress = cli
        .progress
        .map(ProgressMode::from)
        .unwrap_or_else(ProgressMode::default_for_tty);

    match cli.command {
        Commands::List { root } => {
            print_runs(&root)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Init { dir } => {
            let config = load_config(&cli.config, cli.model.as_deref())?;
            let kb = build_kb(config, progress)?;
            Ok(match initialize(&kb, &dir).await? {
                Some(report) => {
                    print_report(&report);
                    ExitCode::SUCCESS
                }
                None => ExitCode::SUCCESS,
            })
        }
        Commands::Query { dir, question } => {
            let config = load_config(&cli.config, cli.model.as_deref())?;
            let kb = build_kb(config, progress)?;
            if initialize(&kb, &dir).await?.is_none() {
                return Ok(ExitCode::SUCCESS);
            }
            match kb.query_text(&question).await {
                Some(answer) => print_answer(&answer),
                None => println!("No relevant information found."),
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Chat { root, dir } => chat(&cli.config, cli.model, progress, root, dir).await,
    }
}

fn load_config(path: &Path, model: Option<&str>) -> Result<Config> {
    let mut config = config::load_or_default(path)?;
    if let Some(model) = model {
        config.llm.chat_model = model.to_string();
    }
    Ok(config)
}

fn build_kb(config: Config, progress: ProgressMode) -> Result<KnowledgeBase> {
    let model = create_model(&config).context("Failed to set up the language model")?;
    Ok(KnowledgeBase::new(config, model).with_progress(progress.reporter()))
}

/// Initialize `dir`. `Ok(None)` when there is nothing to load: that is
/// reported but not treated as a failure.
async fn initialize(kb: &KnowledgeBase, dir: &Path) -> Result<Option<InitReport>> {
    match kb.initialize(dir).await {
        Ok(report) => Ok(Some(report)),
        Err(KbError::NoSummariesFound(path)) => {
            println!("No summary files found in {}.", path.display());
            Ok(None)
        }
        Err(e) => Err(anyhow::Error::new(e).context("Failed to initialize knowledge base")),
    }
}

fn print_report(report: &InitReport) {
    if report.loaded_from_state {
        println!(
            "Loaded {} documents from {}",
            report.documents,
            report.state_dir.display()
        );
    } else {
        println!(
            "Indexed {} documents in {} batches ({} embedding calls, {} cached, {} truncated)",
            report.documents,
            report.batches,
            report.provider.calls,
            report.provider.cache_hits,
            report.provider.truncated_inputs
        );
        println!("State saved to {}", report.state_dir.display());
    }
}

fn print_answer(answer: &QueryAnswer) {
    println!("\n{}\n", answer.answer);
    let usage = &answer.usage;
    if !usage.sources.is_empty() {
        println!("Sources:");
        for source in &usage.sources {
            println!("  - {}", source);
        }
    }
    println!("\nUsage:");
    println!("- Model: {}", usage.model);
    println!("- Prompt Tokens: {}", usage.prompt_tokens);
    println!("- Completion Tokens: {}", usage.completion_tokens);
    println!("- Total Tokens: {}", usage.total_tokens);
    if usage.expanded_search {
        println!("- Expanded Search Terms: {}", usage.num_expansions);
    }
}

fn print_runs(root: &Path) -> Result<()> {
    let runs = find_summary_directories(root)
        .with_context(|| format!("Failed to list {}", root.display()))?;
    if runs.is_empty() {
        println!("No summary directories found under {}.", root.display());
        return Ok(());
    }
    for (i, run) in runs.iter().enumerate() {
        print_run(i + 1, run);
    }
    Ok(())
}

fn print_run(n: usize, run: &SummaryRun) {
    println!("{}. {}", n, run.name);
    if let Some(info) = &run.info {
        println!(
            "   Created: {}",
            info.created_at.as_deref().unwrap_or("Unknown")
        );
        println!("   Model: {}", info.model.as_deref().unwrap_or("Unknown"));
        if let Some(stats) = &info.final_statistics {
            println!(
                "   Files: {} successful, {} failed",
                stats.successful, stats.failed
            );
        }
    }
}

const HELP: &str = "Ask a question about the codebase, or:
  @<category>: <question>   limit to a category (components, utils, services, models, ...)
  #<key>:<value>            exact metadata filter (file_type, directory, source_path)
  help                      show this help
  quit | exit | q           leave";

async fn chat(
    config_path: &Path,
    model: Option<String>,
    progress: ProgressMode,
    root: PathBuf,
    dir: Option<PathBuf>,
) -> Result<ExitCode> {
    let mut input = BufReader::new(tokio::io::stdin()).lines();

    let model = match model {
        Some(model) => model,
        None => match choose_model(&mut input).await? {
            Some(model) => model,
            None => return Ok(ExitCode::SUCCESS),
        },
    };
    let config = load_config(config_path, Some(&model))?;
    let kb = build_kb(config, progress)?;

    let dir = match dir {
        Some(dir) => dir,
        None => match choose_run(&root, &mut input).await? {
            Some(dir) => dir,
            None => return Ok(ExitCode::SUCCESS),
        },
    };

    println!("Initializing knowledge base from {}...", dir.display());
    match initialize(&kb, &dir).await? {
        Some(report) => print_report(&report),
        None => return Ok(ExitCode::SUCCESS),
    }

    let mut session = Session::new(model);
    println!("\nReady. Type 'help' for query syntax, 'quit' to leave.");
    loop {
        let Some(line) = prompt(&mut input, "\nQuestion: ").await? else {
            break;
        };
        match ChatInput::parse(&line) {
            ChatInput::Empty => continue,
            ChatInput::Help => println!("{}", HELP),
            ChatInput::Quit => break,
            ChatInput::Question(question) => {
                let answer = kb.query_text(question).await;
                match &answer {
                    Some(answer) => print_answer(answer),
                    None => println!("No relevant information found."),
                }
                session.record(answer.as_ref());
            }
        }
    }

    let summary = session.summary();
    println!("\nSession Summary:");
    println!("- Model: {}", summary.model);
    println!("- Total Queries: {}", summary.queries);
    println!("- Total Tokens Used: {}", summary.total_tokens);
    if summary.queries > 0 {
        println!("- Average Tokens per Query: {:.1}", summary.average_tokens);
    }
    Ok(ExitCode::SUCCESS)
}

async fn prompt(input: &mut Lines<BufReader<Stdin>>, text: &str) -> Result<Option<String>> {
    print!("{}", text);
    std::io::stdout().flush()?;
    Ok(input.next_line().await?)
}

/// `None` on end of input.
async fn choose_model(input: &mut Lines<BufReader<Stdin>>) -> Result<Option<String>> {
    println!("\nAvailable Models:");
    for (key, _, display) in MODEL_MENU {
        if key.is_empty() {
            println!("Enter: {}", display);
        } else {
            println!("{}: {}", key, display);
        }
    }
    loop {
        let Some(choice) = prompt(input, "\nSelect a model: ").await? else {
            return Ok(None);
        };
        match model_for_choice(&choice) {
            Some(model) => return Ok(Some(model.to_string())),
            None => println!("Invalid choice. Please try again."),
        }
    }
}

/// Pick a `summary_*` run under `root`. A root without runs is offered as
/// the directory itself. `None` on end of input.
async fn choose_run(
    root: &Path,
    input: &mut Lines<BufReader<Stdin>>,
) -> Result<Option<PathBuf>> {
    let runs = find_summary_directories(root)
        .with_context(|| format!("Failed to list {}", root.display()))?;
    if runs.is_empty() {
        return Ok(Some(root.to_path_buf()));
    }

    println!("\nFound {} summary directories:", runs.len());
    for (i, run) in runs.iter().enumerate() {
        print_run(i + 1, run);
    }
    let question = format!("\nSelect a directory (1-{}, Enter for latest): ", runs.len());
    loop {
        let Some(choice) = prompt(input, &question).await? else {
            return Ok(None);
        };
        let choice = choice.trim();
        if choice.is_empty() {
            return Ok(Some(runs[0].path.clone()));
        }
        match choice.parse::<usize>() {
            Ok(n) if (1..=runs.len()).contains(&n) => return Ok(Some(runs[n - 1].path.clone())),
            _ => println!("Invalid choice. Please try again."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "srag",
            "query",
            "./summaries",
            "@utils: string helpers",
            "--model",
            "gpt-4",
            "--progress",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.model.as_deref(), Some("gpt-4"));
        assert!(matches!(cli.progress, Some(ProgressArg::Json)));
        assert!(matches!(cli.command, Commands::Query { .. }));
    }

    #[test]
    fn model_flag_overrides_config() {
        let config = load_config(Path::new("/nonexistent/srag.toml"), Some("gpt-4")).unwrap();
        assert_eq!(config.llm.chat_model, "gpt-4");
    }
}
