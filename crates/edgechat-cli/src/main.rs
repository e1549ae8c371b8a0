mod render;

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use edgechat_core::{
    ChatConfig, ChatError, Model, ModelInitializer, TextMessage, CONFIG_ACCELERATOR,
};
use edgechat_engine::{GenerationOutcome, GenerationReport, StreamingInferenceController};
use edgechat_llm::{OllamaClient, OllamaInitializer};
use edgechat_search::SearchAugmenter;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use render::Printer;

#[derive(Parser)]
#[command(name = "edgechat")]
#[command(about = "EdgeChat - streaming chat with local models and web search", long_about = None)]
struct Cli {
    /// JSON config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Ollama model to chat with
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Skip web search for this run
    #[arg(long, global = true)]
    no_search: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat (default)
    Chat,

    /// Ask a single question and exit
    Ask {
        prompt: String,
    },

    /// Show how a prompt would be augmented by web search
    Search {
        query: String,
    },

    /// List available models
    Models,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .compact()
        .init();

    let cli = Cli::parse();

    let mut config = ChatConfig::load(cli.config.as_deref())?;
    if let Some(model) = cli.model {
        config.ollama.model = model;
    }
    if cli.no_search {
        config.search.enabled = false;
    }

    match cli.command {
        Some(Commands::Ask { prompt }) => cmd_ask(config, &prompt).await?,
        Some(Commands::Search { query }) => cmd_search(&config, &query).await?,
        Some(Commands::Models) => cmd_models(&config).await?,
        Some(Commands::Chat) | None => cmd_chat(config).await?,
    }

    Ok(())
}

/// Controller, model and initializer for one run
struct Chat {
    controller: StreamingInferenceController,
    model: Arc<Model>,
    initializer: Arc<dyn ModelInitializer>,
    printer: Printer,
}

impl Chat {
    async fn start(config: ChatConfig) -> Result<Self> {
        let model = Arc::new(
            Model::new(config.ollama.model.clone()).with_config(CONFIG_ACCELERATOR, "ollama"),
        );
        let initializer: Arc<dyn ModelInitializer> =
            Arc::new(OllamaInitializer::new(&config.ollama.host));

        println!("Loading {}...", model.name);
        let session = initializer.initialize(&model).await?;
        model.attach_session(session);

        Ok(Self {
            controller: StreamingInferenceController::from_config(config),
            model,
            initializer,
            printer: Printer::default(),
        })
    }

    /// Send `message`, recovering from engine errors until it works or the
    /// recovery limit is hit
    async fn send(&mut self, message: TextMessage) -> Result<()> {
        let controller = &self.controller;
        let model = &self.model;

        let mut result = follow(
            controller,
            model,
            &mut self.printer,
            controller.send_message(model, message.clone(), None),
        )
        .await;

        loop {
            match result {
                Ok(report) => {
                    log_report(&report);
                    return Ok(());
                }
                Err(e @ ChatError::RecoveryExhausted(_)) => return Err(e.into()),
                Err(e) => {
                    warn!("Generation failed: {}", e);
                    result = follow(
                        controller,
                        model,
                        &mut self.printer,
                        controller.handle_error(model, self.initializer.clone(), &message),
                    )
                    .await;
                }
            }
        }
    }

    async fn again(&mut self, message: &TextMessage) -> Result<()> {
        let controller = &self.controller;
        let report = follow(
            controller,
            &self.model,
            &mut self.printer,
            controller.run_again(&self.model, message),
        )
        .await?;
        log_report(&report);
        Ok(())
    }

    async fn shutdown(self) {
        self.controller.stop_response(&self.model);
        self.model.detach_session();
        self.initializer.cleanup(&self.model).await;
    }
}

/// Drive a generation future while printing the conversation as it changes.
/// Ctrl-C stops the response instead of killing the process.
async fn follow<F>(
    controller: &StreamingInferenceController,
    model: &Model,
    printer: &mut Printer,
    generation: F,
) -> edgechat_core::Result<GenerationReport>
where
    F: Future<Output = edgechat_core::Result<GenerationReport>>,
{
    let mut rx = controller.subscribe_messages(model);
    let mut stdout = io::stdout();
    let mut stopped = false;

    tokio::pin!(generation);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let result = loop {
        tokio::select! {
            result = &mut generation => break result,
            Ok(()) = rx.changed() => {
                let state = rx.borrow_and_update().clone();
                printer.render(&state, &mut stdout)?;
            }
            _ = &mut ctrl_c, if !stopped => {
                stopped = true;
                controller.stop_response(model);
            }
        }
    };

    let state = rx.borrow().clone();
    printer.render(&state, &mut stdout)?;
    result
}

fn log_report(report: &GenerationReport) {
    match &report.outcome {
        GenerationOutcome::Completed(stats) => info!(
            decode_tokens = stats.decode_tokens,
            "Completed in {:.2}s", stats.latency_secs
        ),
        GenerationOutcome::Cancelled => println!("(stopped)"),
    }
}

async fn cmd_chat(config: ChatConfig) -> Result<()> {
    let mut chat = Chat::start(config).await?;
    display_welcome(&chat.model.name);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut last_user: Option<TextMessage> = None;

    loop {
        print!("> ");
        io::Write::flush(&mut io::stdout())?;

        let Some(line) = next_input(&mut lines, tokio::signal::ctrl_c()).await? else {
            println!();
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        match input {
            "/quit" | "/exit" | "/q" => break,
            "/help" | "/h" => display_help(),
            "/reset" => {
                let attempts = chat.controller.reset_session(&chat.model).await;
                last_user = None;
                println!("Conversation cleared ({} reset attempts)", attempts);
            }
            "/again" => match last_user.clone() {
                Some(message) => {
                    if let Err(e) = chat.again(&message).await {
                        println!("Error: {}", e);
                    }
                }
                None => println!("Nothing to repeat yet"),
            },
            cmd if cmd.starts_with('/') => {
                println!("Unknown command: {}. Type /help for available commands.", cmd);
            }
            prompt => {
                let message = TextMessage::user(prompt);
                last_user = Some(message.clone());
                if let Err(e) = chat.send(message).await {
                    println!("Error: {}", e);
                }
            }
        }
    }

    chat.shutdown().await;
    println!("Goodbye!");
    Ok(())
}

/// Next input line, or `None` on EOF or when `interrupt` fires first
async fn next_input<R, I>(lines: &mut Lines<R>, interrupt: I) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
    I: Future,
{
    tokio::select! {
        line = lines.next_line() => line,
        _ = interrupt => Ok(None),
    }
}

async fn cmd_ask(config: ChatConfig, prompt: &str) -> Result<()> {
    let mut chat = Chat::start(config).await?;
    let result = chat.send(TextMessage::user(prompt)).await;
    chat.shutdown().await;
    result
}

async fn cmd_search(config: &ChatConfig, query: &str) -> Result<()> {
    let augmenter = SearchAugmenter::from_config(&config.search);
    if !augmenter.is_active() {
        bail!("Web search is off: set TAVILY_API_KEY and leave search enabled");
    }

    let augmentation = augmenter.augment(query).await;
    println!();
    println!("Outcome:");
    println!("{:-<40}", "");
    println!("  {:?}", augmentation.outcome);
    if let Some(warning) = augmentation.outcome.warning() {
        println!("  {}", warning);
    }
    println!();
    println!("Prompt sent to the model:");
    println!("{:-<40}", "");
    println!("  {}", augmentation.prompt);
    println!();

    Ok(())
}

async fn cmd_models(config: &ChatConfig) -> Result<()> {
    let client = OllamaClient::new(&config.ollama.host);
    let models = client.list_models().await?;

    println!();
    println!("Available Models:");
    println!("{:-<65}", "");
    println!("  {:<4} {:<40} {}", "#", "Name", "Size (MB)");
    println!("{:-<65}", "");
    for (i, m) in models.iter().enumerate() {
        println!("  {:<4} {:<40} {}", i + 1, m.name, m.size / (1024 * 1024));
    }
    println!();
    println!("  Use: edgechat --model <name>");
    println!();

    Ok(())
}

fn display_welcome(model: &str) {
    println!();
    println!("  EdgeChat ({})", model);
    println!();
    println!("  Type a message to chat. Ctrl-C stops a response, or exits at the prompt.");
    println!("  /help for commands");
    println!();
}

fn display_help() {
    println!();
    println!("Available Commands:");
    println!("  /again         Ask your last message again");
    println!("  /reset         Clear the conversation and reset the session");
    println!("  /help, /h      Show this help message");
    println!("  /quit, /q      Unload the model and exit");
    println!();
}
