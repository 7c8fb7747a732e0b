use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use futures_util::future::BoxFuture;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use civis::config::read_app_config_from;
use civis::conversation::{ConversationEngine, InputOrigin};
use civis::live_data::{
    DataSource, DemographicsRecord, LiveDataGateway, TransitRecord, WeatherRecord,
};

#[derive(Parser)]
#[command(name = "civis")]
#[command(about = "Conversational assistant for the Revere municipal-data dashboard")]
#[command(version)]
struct Args {
    /// Path to the configuration file
    #[arg(long, default_value = "config.toml")]
    config: String,

    /// Answer from documents only; never call the live-data providers
    #[arg(long)]
    no_live_data: bool,

    /// Documents to load before the first prompt
    documents: Vec<PathBuf>,
}

/// Stand-in data source for `--no-live-data` runs
struct DisabledSource;

impl DataSource for DisabledSource {
    fn fetch_weather(&self) -> BoxFuture<'_, anyhow::Result<WeatherRecord>> {
        Box::pin(async { Err(anyhow::anyhow!("live data disabled")) })
    }

    fn fetch_transit(&self) -> BoxFuture<'_, anyhow::Result<TransitRecord>> {
        Box::pin(async { Err(anyhow::anyhow!("live data disabled")) })
    }

    fn fetch_demographics(&self) -> BoxFuture<'_, anyhow::Result<DemographicsRecord>> {
        Box::pin(async { Err(anyhow::anyhow!("live data disabled")) })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let app_config = read_app_config_from(&args.config);
    let gateway = if args.no_live_data {
        LiveDataGateway::new(Arc::new(DisabledSource))
    } else {
        LiveDataGateway::over_http(app_config.providers.clone())?
    };
    let engine = ConversationEngine::new(&app_config, gateway);

    for path in &args.documents {
        match load_document(&engine, path) {
            Ok(ack) => println!("{}\n", ack),
            Err(e) => eprintln!("Skipping {}: {}", path.display(), e),
        }
    }

    println!("civis ready. Ask about Revere, or :load a document (:quit to exit).");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"you> ").await?;
        stdout.flush().await?;

        let line = match lines.next_line().await? {
            Some(line) => line,
            None => break,
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        if let Some(command) = input.strip_prefix(':') {
            if !run_command(&engine, command)? {
                break;
            }
            continue;
        }

        let reply = engine.handle_input(input, InputOrigin::Typed).await;
        println!("\n{}\n", reply.content);
        if let Some(metadata) = &reply.metadata {
            println!(
                "[{} | {} API call(s) | {}ms]\n",
                metadata.data_source,
                metadata.api_calls.len(),
                metadata.processing_time
            );
        }
    }

    Ok(())
}

/// Handle a `:command` line; false means quit
fn run_command(engine: &ConversationEngine, command: &str) -> anyhow::Result<bool> {
    let (name, rest) = match command.split_once(' ') {
        Some((name, rest)) => (name, rest.trim()),
        None => (command, ""),
    };

    match name {
        "quit" | "q" => return Ok(false),
        "load" => {
            if rest.is_empty() {
                println!("Usage: :load <path>");
            } else {
                match load_document(engine, Path::new(rest)) {
                    Ok(ack) => println!("\n{}\n", ack),
                    Err(e) => eprintln!("Upload failed: {}", e),
                }
            }
        }
        "docs" => {
            let summaries = engine.document_summaries();
            if summaries.is_empty() {
                println!("No documents uploaded.");
            } else {
                for (id, name, chunks) in summaries {
                    println!("{}  {} ({} chunk(s))", id, name, chunks);
                }
            }
        }
        "remove" => {
            if engine.remove_document(rest) {
                println!("Removed {}", rest);
            } else {
                println!("No document with id {}", rest);
            }
        }
        _ => println!("Commands: :load <path>, :docs, :remove <id>, :quit"),
    }
    Ok(true)
}

fn load_document(engine: &ConversationEngine, path: &Path) -> anyhow::Result<String> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let ack = engine.add_document(&name, mime_for_path(path), &bytes)?;
    Ok(ack.content)
}

fn mime_for_path(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
        .as_deref()
    {
        Some("pdf") => "application/pdf",
        Some("docx") | Some("doc") => {
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        }
        Some("md") => "text/markdown",
        Some("csv") => "text/csv",
        Some("wav") | Some("mp3") | Some("ogg") | Some("flac") => "audio/mpeg",
        _ => "text/plain",
    }
}
