use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::client::ContentGenerator;
use crate::error::{ChatError, Result};
use crate::metrics::{UPSTREAM_FAILURES, UPSTREAM_LATENCY};
use crate::models::PromptJob;

/// Room for a single job: the session never has more than one in flight.
pub const QUEUE_DEPTH: usize = 1;

pub async fn prompt_worker<G: ContentGenerator>(mut rx: mpsc::Receiver<PromptJob>, generator: G) {
    info!("Prompt worker started - processing prompts sequentially");

    // keep receiving prompts from the queue
    while let Some(job) = rx.recv().await {
        let start_time = Instant::now();
        let result = generator.generate(&job.prompt).await;
        UPSTREAM_LATENCY.observe(start_time.elapsed().as_secs_f64());

        if let Err(e) = &result {
            UPSTREAM_FAILURES.inc();
            warn!("[Worker] generateContent failed: {}", e);
        }

        // Send reply back to the session
        let _ = job.reply_tx.send(result);
    }
    info!("Prompt worker stopped");
}

/// Session-side handle on the worker queue.
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::Sender<PromptJob>,
}

impl Dispatcher {
    /// Spawn the worker on the current runtime.
    pub fn spawn<G: ContentGenerator>(generator: G) -> Self {
        let (tx, rx) = mpsc::channel::<PromptJob>(QUEUE_DEPTH);
        tokio::spawn(prompt_worker(rx, generator));
        Self { tx }
    }

    pub async fn dispatch(&self, prompt: &str) -> Result<String> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job = PromptJob {
            prompt: prompt.to_string(),
            reply_tx,
        };

        self.tx.send(job).await.map_err(|_| ChatError::WorkerGone)?;
        reply_rx.await.map_err(|_| ChatError::WorkerGone)?
    }
}
