use std::cell::Cell;
use std::io;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use crossterm::{
    event::{DisableBracketedPaste, EnableBracketedPaste},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode},
};
use tracing::debug;
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

use repl_toolkit::images::{content_blocks, parse_image_references, reconstruct_message, ContentPart};
use repl_toolkit::{
    Action, ActionError, ActionRegistry, AsyncRepl, Backend, Cancellable, Emit, HeadlessRepl,
    Images, PlainEmitter, ReplConfig, StyledEmitter, TerminalEditor,
};

#[derive(Debug, Parser)]
#[command(name = "repl-demo", about = "Echo REPL built on repl-toolkit")]
struct Cli {
    /// Read lines from stdin instead of the terminal
    #[arg(long)]
    headless: bool,

    /// JSON config file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Message processed before the first prompt
    #[arg(long, short)]
    message: Option<String>,

    /// Log filter, e.g. "debug" or "repl_toolkit=trace" (logs go to stderr)
    #[arg(long, value_name = "FILTER")]
    log_level: Option<String>,

    /// Echo messages as JSON content blocks
    #[arg(long)]
    blocks: bool,

    /// Delay per echoed word
    #[arg(long, default_value_t = 150)]
    word_delay_ms: u64,
}

/// Echoes input back one word at a time; stops early when cancelled.
struct EchoBackend {
    emitter: Box<dyn Emit>,
    word_delay: Duration,
    blocks: bool,
    stop: Cell<bool>,
}

impl EchoBackend {
    fn render(&self, input: &str, images: &Images) -> anyhow::Result<String> {
        if self.blocks {
            return Ok(serde_json::to_string_pretty(&content_blocks(input, images))?);
        }
        Ok(reconstruct_message(input, images, |part| match part {
            ContentPart::Text(text) => text.to_string(),
            ContentPart::Image { id, image: Some(image) } => {
                format!("[image {}: {}, {} bytes]", id, image.media_type, image.data.len())
            }
            ContentPart::Image { id, image: None } => format!("[missing image {}]", id),
        }))
    }
}

#[async_trait(?Send)]
impl Backend for EchoBackend {
    async fn handle_input(&self, input: &str, images: &Images) -> anyhow::Result<bool> {
        self.stop.set(false);
        let rendered = self.render(input, images)?;

        for word in input.split_whitespace() {
            tokio::time::sleep(self.word_delay).await;
            if self.stop.get() {
                debug!(word, "echo stopped");
                return Ok(false);
            }
        }

        self.emitter.emit(&format!("Echo: {}", rendered));
        Ok(true)
    }

    fn as_cancellable(&self) -> Option<&dyn Cancellable> {
        Some(self)
    }
}

impl Cancellable for EchoBackend {
    fn cancel(&self, reason: Option<&str>) -> anyhow::Result<()> {
        debug!(reason, "echo cancel requested");
        self.stop.set(true);
        Ok(())
    }
}

fn echo_images_action(prefix: char) -> Action {
    Action::new("echo-images", "List attachments and the ones referenced in the input", "Input")
        .handler(|ctx| {
            let referenced = ctx
                .buffer
                .as_deref()
                .map(|buffer| parse_image_references(buffer.text()).image_ids)
                .unwrap_or_default();

            let lines = match ctx.images.as_deref() {
                Some(images) if !images.is_empty() => {
                    let mut ids: Vec<_> = images.images().keys().cloned().collect();
                    ids.sort();
                    ids.into_iter()
                        .filter_map(|id| {
                            let image = images.get(&id)?;
                            let mark = if referenced.contains(&id) { "*" } else { " " };
                            Some(format!(
                                "{} {} {} {} bytes (added {})",
                                mark,
                                id,
                                image.media_type,
                                image.data.len(),
                                image.timestamp.format("%H:%M:%S")
                            ))
                        })
                        .collect::<Vec<_>>()
                }
                _ => vec!["No attachments".to_string()],
            };
            ctx.emit(&lines.join("\n"));
            Ok(())
        })
        .command(format!("{}echo-images", prefix))
        .usage(format!("{}echo-images - List pending attachments", prefix))
        .key("f7")
        .keys_description("List attachments")
}

fn build_registry(config: &ReplConfig) -> Result<ActionRegistry, ActionError> {
    let mut registry = ActionRegistry::with_prefix(config.command_prefix);
    registry.register(echo_images_action(config.command_prefix))?;
    Ok(registry)
}

fn init_tracing(filter: Option<&str>) {
    let env_filter = match filter {
        Some(filter) => EnvFilter::new(filter),
        None => EnvFilter::builder()
            .with_default_directive(LevelFilter::WARN.into())
            .from_env_lossy(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    let config = match &cli.config {
        Some(path) => ReplConfig::load(path)?,
        None => ReplConfig::default(),
    };
    let registry = build_registry(&config)?;

    if cli.headless {
        let backend = Rc::new(EchoBackend {
            emitter: Box::new(PlainEmitter),
            word_delay: Duration::ZERO,
            blocks: cli.blocks,
            stop: Cell::new(false),
        });
        let mut repl = HeadlessRepl::new(registry, Box::new(PlainEmitter)).with_config(config);
        let report = repl.run_stdin(backend, cli.message.as_deref()).await?;
        debug!(sends = report.send_count, success = report.success, "headless run finished");
        if !report.success {
            std::process::exit(1);
        }
        return Ok(());
    }

    let backend = Rc::new(EchoBackend {
        emitter: Box::new(StyledEmitter),
        word_delay: Duration::from_millis(cli.word_delay_ms),
        blocks: cli.blocks,
        stop: Cell::new(false),
    });
    let mut repl =
        AsyncRepl::new(registry, Box::new(TerminalEditor::new()), Box::new(StyledEmitter)).with_config(config);

    // Setup terminal
    enable_raw_mode()?;
    execute!(io::stdout(), EnableBracketedPaste)?;
    StyledEmitter.emit_status("Alt+Enter sends, Alt+C cancels, /help lists commands, /exit quits.");

    let result = repl.run(backend, cli.message.as_deref()).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(io::stdout(), DisableBracketedPaste)?;

    if let Err(e) = result {
        eprintln!("Error: {}", e);
    }

    Ok(())
}
