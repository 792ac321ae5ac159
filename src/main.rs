use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use nekebot::client::GeminiClient;
use nekebot::clock::SystemClock;
use nekebot::config::{Args, Config};
use nekebot::governor::Governor;
use nekebot::history::{FileHistoryStore, HistoryStore, MemoryHistoryStore};
use nekebot::logging;
use nekebot::rate_limit::describe_duration;
use nekebot::repl;
use nekebot::session::ChatSession;
use nekebot::store::{CounterStore, FileCounterStore, MemoryCounterStore};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    // parse cli arguments
    let args = Args::parse();
    let config = Config::load(args).context("Failed to load configuration")?;

    let api_key = config
        .api_key
        .clone()
        .context("No API key: pass --api-key or set GEMINI_API_KEY")?;

    let (counters, history): (Box<dyn CounterStore>, Box<dyn HistoryStore>) =
        match &config.data_dir {
            Some(dir) => {
                info!("Data directory: {}", dir.display());
                (
                    Box::new(FileCounterStore::in_dir(dir)),
                    Box::new(FileHistoryStore::in_dir(dir)),
                )
            }
            None => {
                info!("Ephemeral mode, nothing is written to disk");
                (
                    Box::new(MemoryCounterStore::new()),
                    Box::new(MemoryHistoryStore::new()),
                )
            }
        };

    info!("Model: {} at {}", config.model, config.api_base);
    info!(
        "Rate limit: {} requests per {}, {} block",
        config.policy.max_requests,
        describe_duration(config.policy.window),
        describe_duration(config.policy.block)
    );

    let client = GeminiClient::new(&config.api_base, &config.model, &api_key, config.timeout)?;
    let governor = Governor::new(config.policy, counters);

    let mut session = ChatSession::builder(governor, history, Arc::new(SystemClock))
        .max_prompt_chars(config.max_prompt_chars)
        .build(client)
        .await;

    repl::run(&mut session).await
}
