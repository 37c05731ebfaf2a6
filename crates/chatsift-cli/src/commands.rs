//! Operator command surface: `/config`, `/tags`, `/add_tag`, and friends.
//!
//! Commands arrive on the same channel as data messages and act on the
//! sending source. Replies are plain text.

use std::fmt::Write as _;
use std::sync::Arc;

use arrow::error::ArrowError;
use chatsift_core::{
    ConfigMutation, ConfigStore, SourceConfig, SourceId, StoredRecord, TagValueLog,
    ValidationError, messages,
};
use chatsift_store::{ConfigBacking, RecordStore, StoreError};
use thiserror::Error;
use tracing::{info, warn};

use crate::display;

pub const DEFAULT_LIMIT: usize = 10;
pub const MAX_LIMIT: usize = 50;

const HELP: &str = "\
Available commands:
/config - show this message
/tags - list tag rules
/add_tag tag:field - add a tag rule (split on the last ':')
/toggle_tag tag - switch a tag rule on or off
/nlp on|off - enable or disable auxiliary extraction
/threshold 0.7 - set the duplicate threshold (0..1)
/activate - start processing messages from this source
/deactivate - stop processing messages from this source
/status - show this source's settings
/data [limit] - show the latest records
/data_chat source_id [limit] - show the latest records of one source
/show_values - show every value extracted by tag rules
/show_tag_values tag - show values extracted by one tag rule";

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unknown command '{0}', send /config for help")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("not a number: '{0}'")]
    InvalidNumber(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("could not render records: {0}")]
    Render(#[from] ArrowError),
}

/// A parsed operator command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Tags,
    AddTag { tag: String, field: String },
    ToggleTag(String),
    Auxiliary(bool),
    Threshold(f64),
    Activate,
    Deactivate,
    Status,
    Data { limit: usize },
    DataChat { source_id: SourceId, limit: usize },
    ShowValues,
    ShowTagValues(String),
}

impl Command {
    /// Whether `text` is addressed to the command surface.
    pub fn is_command(text: &str) -> bool {
        text.trim_start().starts_with('/')
    }

    pub fn parse(text: &str) -> Result<Self, CommandError> {
        let text = text.trim();
        let (name, arg) = match text.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (text, ""),
        };

        let command = match name {
            "/config" | "/help" => Command::Help,
            "/tags" | "/show_tags" => Command::Tags,
            "/add_tag" => {
                let (tag, field) = arg
                    .rsplit_once(':')
                    .ok_or(CommandError::Usage("/add_tag tag:field, e.g. /add_tag Дата::date"))?;
                Command::AddTag {
                    tag: tag.to_string(),
                    field: field.to_string(),
                }
            }
            "/toggle_tag" => Command::ToggleTag(required(arg, "/toggle_tag tag")?.to_string()),
            "/nlp" => match arg.to_lowercase().as_str() {
                "on" => Command::Auxiliary(true),
                "off" => Command::Auxiliary(false),
                _ => return Err(CommandError::Usage("/nlp on|off")),
            },
            "/threshold" => {
                let arg = required(arg, "/threshold 0.7")?;
                let value = arg
                    .parse::<f64>()
                    .map_err(|_| CommandError::InvalidNumber(arg.to_string()))?;
                Command::Threshold(value)
            }
            "/activate" => Command::Activate,
            "/deactivate" => Command::Deactivate,
            "/status" => Command::Status,
            "/data" => Command::Data {
                limit: parse_limit(arg)?,
            },
            "/data_chat" => {
                let mut parts = arg.split_whitespace();
                let id = parts
                    .next()
                    .ok_or(CommandError::Usage("/data_chat source_id [limit]"))?;
                let source_id = id
                    .parse::<SourceId>()
                    .map_err(|_| CommandError::InvalidNumber(id.to_string()))?;
                Command::DataChat {
                    source_id,
                    limit: parse_limit(parts.next().unwrap_or(""))?,
                }
            }
            "/show_values" => Command::ShowValues,
            "/show_tag_values" => {
                Command::ShowTagValues(required(arg, "/show_tag_values tag")?.to_string())
            }
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(command)
    }
}

fn required<'a>(arg: &'a str, usage: &'static str) -> Result<&'a str, CommandError> {
    if arg.is_empty() {
        Err(CommandError::Usage(usage))
    } else {
        Ok(arg)
    }
}

/// Default 10; non-positive becomes 10; capped at 50.
fn parse_limit(arg: &str) -> Result<usize, CommandError> {
    if arg.is_empty() {
        return Ok(DEFAULT_LIMIT);
    }
    let n = arg
        .parse::<i64>()
        .map_err(|_| CommandError::InvalidNumber(arg.to_string()))?;
    Ok(normalize_limit(n))
}

pub fn normalize_limit(n: i64) -> usize {
    if n <= 0 {
        DEFAULT_LIMIT
    } else {
        (n as usize).min(MAX_LIMIT)
    }
}

/// Executes commands against the live config store and the record store.
pub struct CommandHandler {
    configs: Arc<ConfigStore>,
    backing: Arc<dyn ConfigBacking>,
    records: Arc<dyn RecordStore>,
    tag_values: Arc<TagValueLog>,
}

impl CommandHandler {
    pub fn new(
        configs: Arc<ConfigStore>,
        backing: Arc<dyn ConfigBacking>,
        records: Arc<dyn RecordStore>,
        tag_values: Arc<TagValueLog>,
    ) -> Self {
        Self {
            configs,
            backing,
            records,
            tag_values,
        }
    }

    /// Parse and run `text` for `source_id`. Errors become the reply.
    pub fn execute(&self, source_id: SourceId, text: &str) -> String {
        match Command::parse(text).and_then(|cmd| self.run(source_id, cmd)) {
            Ok(reply) => reply,
            Err(e) => {
                warn!(source_id, command = text.trim(), error = %e, "command failed");
                format!("Error: {e}")
            }
        }
    }

    pub fn run(&self, source_id: SourceId, command: Command) -> Result<String, CommandError> {
        match command {
            Command::Help => Ok(HELP.to_string()),
            Command::Tags => Ok(render_tags(&self.configs.get_or_create(source_id))),
            Command::AddTag { tag, field } => {
                let config = self.mutate(
                    source_id,
                    ConfigMutation::AddRule {
                        tag: tag.clone(),
                        field: field.clone(),
                    },
                )?;
                let rule = config.tag_rules.last().map(|r| (r.tag.as_str(), r.field.as_str()));
                let (tag, field) = rule.unwrap_or((tag.trim(), field.trim()));
                Ok(format!("Tag '{tag}' added for field '{field}'"))
            }
            Command::ToggleTag(tag) => {
                let mutation = ConfigMutation::ToggleRule { tag: tag.clone() };
                let config = self.mutate(source_id, mutation)?;
                let state = match config.rule(tag.trim()) {
                    Some(rule) if rule.active => "enabled",
                    _ => "disabled",
                };
                Ok(format!("Tag '{}' {state}", tag.trim()))
            }
            Command::Auxiliary(enabled) => {
                self.mutate(source_id, ConfigMutation::SetAuxiliary(enabled))?;
                Ok(format!("Auxiliary extraction {}", on_off(enabled)))
            }
            Command::Threshold(value) => {
                self.mutate(source_id, ConfigMutation::SetThreshold(value))?;
                Ok(format!("Duplicate threshold set to {value}"))
            }
            Command::Activate => {
                self.mutate(source_id, ConfigMutation::SetActive(true))?;
                Ok("Source activated".to_string())
            }
            Command::Deactivate => {
                self.mutate(source_id, ConfigMutation::SetActive(false))?;
                Ok("Source deactivated".to_string())
            }
            Command::Status => Ok(render_status(&self.configs.get_or_create(source_id))),
            Command::Data { limit } => {
                let records = self.records.recent_all(limit)?;
                render_records(&records, "No records stored.")
            }
            Command::DataChat {
                source_id: target,
                limit,
            } => {
                let records = self.records.recent(target, limit)?;
                render_records(&records, &format!("No records stored for source {target}."))
            }
            Command::ShowValues => Ok(self.render_values(source_id)),
            Command::ShowTagValues(tag) => self.render_tag_values(source_id, tag.trim()),
        }
    }

    /// Apply a mutation, saving it to durable backing before it goes live.
    fn mutate(
        &self,
        source_id: SourceId,
        mutation: ConfigMutation,
    ) -> Result<Arc<SourceConfig>, CommandError> {
        let config = self.configs.update_with(source_id, mutation, |next| {
            self.backing.save_config(next).map_err(CommandError::from)
        })?;
        info!(source_id, "source config saved");
        Ok(config)
    }

    fn render_values(&self, source_id: SourceId) -> String {
        let values = self.tag_values.values(source_id);
        if values.is_empty() {
            return "No tag values recorded for this source.".to_string();
        }
        let mut out = String::from("Tag values:\n");
        for (field, list) in &values {
            let _ = writeln!(out, "\n{field}:");
            for value in list {
                let _ = writeln!(out, "- {value}");
            }
        }
        out
    }

    fn render_tag_values(&self, source_id: SourceId, tag: &str) -> Result<String, CommandError> {
        let config = self.configs.get_or_create(source_id);
        let field = match config.rule(tag) {
            Some(rule) => rule.field.clone(),
            None => return Err(ValidationError::UnknownTag(tag.to_string()).into()),
        };
        let values = self.tag_values.field_values(source_id, &field);
        if values.is_empty() {
            return Ok(format!("No values recorded for tag '{tag}'."));
        }
        let mut out = format!("Values for tag '{tag}' (field {field}):\n");
        for value in values {
            let _ = writeln!(out, "- {value}");
        }
        Ok(out)
    }
}

fn on_off(flag: bool) -> &'static str {
    if flag { "on" } else { "off" }
}

fn render_tags(config: &SourceConfig) -> String {
    let mut out = String::from("Tag rules ([x] active, [ ] inactive):\n");
    for rule in &config.tag_rules {
        let mark = if rule.active { "x" } else { " " };
        let _ = writeln!(out, "[{mark}] {} -> {}", rule.tag, rule.field);
    }
    out.push_str("\nUse /toggle_tag tag to switch a rule, /add_tag tag:field to add one.");
    out
}

pub(crate) fn render_status(config: &SourceConfig) -> String {
    let rules = config.active_tag_rules();
    let mut out = format!("Source {}\n", config.source_id);
    let processing = if config.active { "active" } else { "inactive" };
    let _ = writeln!(out, "Processing: {processing}");
    let _ = writeln!(out, "Auxiliary extraction: {}", on_off(config.use_auxiliary));
    let _ = writeln!(out, "Duplicate threshold: {}", config.duplicate_threshold);
    let _ = writeln!(out, "Active tags: {}", rules.len());
    for (tag, field) in &rules {
        let _ = writeln!(out, "  {tag} -> {field}");
    }
    out
}

fn render_records(records: &[StoredRecord], empty: &str) -> Result<String, CommandError> {
    if records.is_empty() {
        return Ok(empty.to_string());
    }
    let batch = messages::records_to_batch(records)?;
    Ok(format!(
        "Latest {} records:\n\n{}",
        records.len(),
        display::render_cards(&batch)
    ))
}
