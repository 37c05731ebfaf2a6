//! Ingestion gateway: JSON lines in, commands answered, data messages queued.

use std::io::{BufRead, Write};
use std::sync::Arc;

use anyhow::Context;
use chatsift_core::{ConfigStore, QueueItem, SourceId, preview};
use chatsift_pipeline::{EnqueueOutcome, Pipeline};
use chatsift_store::ConfigBacking;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::commands::{Command, CommandHandler};

/// One inbound chat message.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundMessage {
    pub source_id: SourceId,
    pub text: String,
    /// Defaults to the time the line is read.
    #[serde(default)]
    pub received_at: Option<DateTime<Utc>>,
}

/// Where a message went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    Command,
    Queued,
    Rejected,
    SkippedInactive,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewaySummary {
    pub lines: u64,
    pub malformed: u64,
    pub commands: u64,
    pub queued: u64,
    pub rejected: u64,
    pub skipped_inactive: u64,
}

pub struct Gateway<'a> {
    configs: Arc<ConfigStore>,
    backing: Arc<dyn ConfigBacking>,
    commands: &'a CommandHandler,
    pipeline: &'a Pipeline,
}

impl<'a> Gateway<'a> {
    pub fn new(
        configs: Arc<ConfigStore>,
        backing: Arc<dyn ConfigBacking>,
        commands: &'a CommandHandler,
        pipeline: &'a Pipeline,
    ) -> Self {
        Self {
            configs,
            backing,
            commands,
            pipeline,
        }
    }

    /// Answer a command, or register the source and hand the message to the pipeline.
    pub fn handle(&self, message: InboundMessage, out: &mut impl Write) -> anyhow::Result<Routed> {
        if Command::is_command(&message.text) {
            let reply = self.commands.execute(message.source_id, &message.text);
            writeln!(out, "{reply}").context("writing command reply")?;
            return Ok(Routed::Command);
        }

        let (config, created) = self.configs.register(message.source_id);
        if created {
            match self.backing.save_config(&config) {
                Ok(()) => info!(source_id = message.source_id, "registered new source"),
                Err(e) => warn!(
                    source_id = message.source_id,
                    error = %e,
                    "new source registered but not saved"
                ),
            }
        }
        if !config.active {
            debug!(source_id = message.source_id, "source inactive, message skipped");
            return Ok(Routed::SkippedInactive);
        }

        let received_at = message.received_at.unwrap_or_else(Utc::now);
        let item = QueueItem::new(message.source_id, message.text, received_at);
        Ok(match self.pipeline.submit(item) {
            EnqueueOutcome::Queued | EnqueueOutcome::Evicted(_) => Routed::Queued,
            EnqueueOutcome::Rejected(_) => Routed::Rejected,
        })
    }

    /// Process every line of `input`. Blank lines are ignored; malformed ones
    /// are logged and skipped.
    pub fn run(&self, input: impl BufRead, mut out: impl Write) -> anyhow::Result<GatewaySummary> {
        let mut summary = GatewaySummary::default();
        for (n, line) in input.lines().enumerate() {
            let line = line.context("reading input")?;
            if line.trim().is_empty() {
                continue;
            }
            summary.lines += 1;

            let message: InboundMessage = match serde_json::from_str(&line) {
                Ok(message) => message,
                Err(e) => {
                    warn!(
                        line = n + 1,
                        error = %e,
                        input = %preview(&line, 100),
                        "malformed input line"
                    );
                    summary.malformed += 1;
                    continue;
                }
            };

            match self.handle(message, &mut out)? {
                Routed::Command => summary.commands += 1,
                Routed::Queued => summary.queued += 1,
                Routed::Rejected => summary.rejected += 1,
                Routed::SkippedInactive => summary.skipped_inactive += 1,
            }
        }
        out.flush().context("flushing output")?;
        Ok(summary)
    }
}
