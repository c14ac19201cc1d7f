//! Dispatcher client: subscribe to the event stream, judge on request,
//! report submission events back. Messages are newline-delimited JSON.

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use oj_core::events::{AuthRequest, ServerEvent};
use oj_pipeline::{HandlerConfig, handle_submission};

use crate::config::WorkerConfig;

pub struct DispatcherClient {
    config: WorkerConfig,
    handler: HandlerConfig,
}

impl DispatcherClient {
    pub fn new(config: WorkerConfig) -> Self {
        let handler = config.handler_config();
        Self { config, handler }
    }

    /// Connect, authenticate, and serve requests until the server closes
    /// the subscription.
    pub async fn run(&self) -> Result<()> {
        let stream = TcpStream::connect(&self.config.server)
            .await
            .with_context(|| format!("error connecting to server {}", self.config.server))?;
        info!(server = %self.config.server, "connected to dispatcher");

        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        send_line(
            &mut write_half,
            &AuthRequest {
                token: self.config.auth_token.clone(),
            },
        )
        .await
        .context("failed to send auth request")?;

        while let Some(line) = lines.next_line().await.context("subscription read failed")? {
            if line.trim().is_empty() {
                continue;
            }
            let event: ServerEvent = match serde_json::from_str(&line) {
                Ok(event) => event,
                Err(err) => {
                    error!("unknown or unexpected server event: {err} ({line})");
                    continue;
                }
            };
            self.process(event, &mut write_half).await?;
        }

        info!("the subscription channel was closed by the server");
        Ok(())
    }

    async fn process(&self, event: ServerEvent, writer: &mut OwnedWriteHalf) -> Result<()> {
        match event {
            ServerEvent::RequestJudge(req) => {
                info!(submission = req.id, problem = req.problem_id, "judge requested");

                let (tx, mut rx) = mpsc::channel(16);
                let handler = self.handler.clone();
                let judge = tokio::spawn(async move {
                    handle_submission(&handler, &req, &tx).await
                });

                while let Some(event) = rx.recv().await {
                    debug!(?event, "reporting submission event");
                    send_line(writer, &event)
                        .await
                        .context("failed to report submission event")?;
                }

                judge
                    .await
                    .context("judge task panicked")?
                    .context("judge task failed")?;
                info!("judge complete, report sent");
            }
            ServerEvent::AbortTask { id } => {
                warn!(id, "abort requested; not implemented");
            }
            ServerEvent::QueryStatus => {
                warn!("status query; not implemented");
            }
        }
        Ok(())
    }
}

async fn send_line<T: Serialize>(writer: &mut OwnedWriteHalf, message: &T) -> Result<()> {
    let mut line = serde_json::to_string(message).context("failed to encode message")?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    Ok(())
}
