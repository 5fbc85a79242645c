use finops_copilot::config::{AppConfig, Target};
use finops_copilot::cur::{CurSummary, DEFAULT_TOP_SERVICES};
use finops_copilot::nlq::Question;
use finops_copilot::tags::{correct_tags, handle_validation_event, Tag};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "finops-copilot")]
#[command(about = "Ask AWS cost and resource questions in plain language")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer one question and print the JSON payload
    Ask {
        /// The question in natural language
        question: String,

        /// Backend to query: billing or config
        #[arg(short, long, default_value = "billing")]
        target: Target,
    },
    /// Interactive question loop (/history, /quit)
    Chat {
        /// Backend to query: billing or config
        #[arg(short, long, default_value = "billing")]
        target: Target,
    },
    /// Summarize a Cost and Usage Report CSV (plain or .gz)
    SummarizeCur {
        /// CUR export file
        csv_file: PathBuf,

        /// Number of top services to include
        #[arg(long, default_value_t = DEFAULT_TOP_SERVICES)]
        top: usize,

        /// Print the aggregated summary without calling the LLM
        #[arg(long)]
        no_llm: bool,
    },
    /// Validate governance tags from a JSON event file ({"tags": {...}})
    ValidateTags {
        event_file: PathBuf,
    },
    /// Print capitalization corrections for a JSON list of {"Key", "Value"} tags
    CorrectTags {
        tags_file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Ask { question, target } => run_ask(question, target).await,
        Commands::Chat { target } => run_chat(target).await,
        Commands::SummarizeCur { csv_file, top, no_llm } => run_summarize(csv_file, top, no_llm).await,
        Commands::ValidateTags { event_file } => run_validate_tags(event_file),
        Commands::CorrectTags { tags_file } => run_correct_tags(tags_file),
    }
}

async fn run_ask(question: String, target: Target) -> Result<()> {
    let config = AppConfig::from_env()?;
    let gateway = config.gateway(target).await?;

    let payload = gateway.ask(&Question::new(question)).await;
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

async fn run_chat(target: Target) -> Result<()> {
    let config = AppConfig::from_env()?;
    let gateway = config.gateway(target).await?;
    info!(?target, "chat session started");

    println!("Ask a question about your AWS {} data. /history shows the conversation, /quit exits.",
        match target {
            Target::Billing => "Cost and Usage",
            Target::Config => "resource",
        });

    // Conversation memory lives here, not in the gateway
    let mut history: Vec<(String, String)> = Vec::new();
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        print!("You: ");
        io::stdout().flush()?;

        let Some(line) = lines.next() else {
            break;
        };
        let input = line?;
        let input = input.trim();

        match input {
            "" => continue,
            "/quit" | "/exit" => break,
            "/history" => {
                for (user, bot) in &history {
                    println!("You: {}\nBot: {}\n", user, bot);
                }
                continue;
            }
            _ => {}
        }

        let payload = gateway.ask(&Question::new(input)).await;
        let answer = payload.to_display_string();
        println!("Bot: {}\n", answer);
        history.push((input.to_string(), answer));
    }
    Ok(())
}

async fn run_summarize(csv_file: PathBuf, top: usize, no_llm: bool) -> Result<()> {
    let summary = CurSummary::from_path(&csv_file, top)
        .with_context(|| format!("Failed to read CUR file {}", csv_file.display()))?;

    if no_llm {
        println!("{}", summary.render_lines());
        println!("\nTotal monthly spend: {}", finops_copilot::cur::format_usd(summary.total));
        return Ok(());
    }

    let config = AppConfig::from_env()?;
    let generator = config.text_generator()?;
    let narrative = summary.narrate(generator.as_ref()).await?;
    println!("{}", narrative);
    Ok(())
}

fn run_validate_tags(event_file: PathBuf) -> Result<()> {
    let content = std::fs::read_to_string(&event_file)
        .with_context(|| format!("Failed to read {}", event_file.display()))?;
    let event: serde_json::Value = serde_json::from_str(&content)?;
    let response = handle_validation_event(&event)?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn run_correct_tags(tags_file: PathBuf) -> Result<()> {
    let content = std::fs::read_to_string(&tags_file)
        .with_context(|| format!("Failed to read {}", tags_file.display()))?;
    let tags: Vec<Tag> = serde_json::from_str(&content)?;
    let corrections = correct_tags(&tags);
    info!(corrections = corrections.len(), "tag corrections computed");
    println!("{}", serde_json::to_string_pretty(&corrections)?);
    Ok(())
}
