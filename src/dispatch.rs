//! Parses prefixed commands out of inbound messages and runs their handlers.
//!
//! Per message the dispatcher walks `Received → Parsed → RateChecked →
//! CooldownChecked → Executing → Replied | Rejected | Dropped`. Handler
//! errors are caught at this boundary and turned into a user-facing reply;
//! they never abort the batch loop. The registry is a closed enum, so an
//! unknown command name deterministically produces no response.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::DispatchError;
use crate::normalize::InboundMessage;
use crate::rate::RateGuard;
use crate::stats::Stats;
use crate::task::{TaskOutcome, TaskRunner};
use crate::transport::{Presence, Transport};
use crate::vcard::ContactCard;

/// The closed set of commands known at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Ai,
    Vcf,
    Stats,
    Help,
    Premium,
}

impl Command {
    /// Look up a lowercased command name. Unknown names are not an error;
    /// they simply produce no response.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "ai" => Some(Self::Ai),
            "vcf" => Some(Self::Vcf),
            "stats" => Some(Self::Stats),
            "help" => Some(Self::Help),
            "premium" => Some(Self::Premium),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Ai => "ai",
            Self::Vcf => "vcf",
            Self::Stats => "stats",
            Self::Help => "help",
            Self::Premium => "premium",
        }
    }
}

/// A recognized command with its trimmed argument string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub command: Command,
    pub args: String,
}

/// Extract a command from message text.
///
/// The text must begin with the prefix character; the token up to the first
/// whitespace (case-insensitive) is the command name, the remainder the
/// argument string. Returns `None` for non-commands and unknown names alike.
pub fn parse_command(text: &str, prefix: char) -> Option<ParsedCommand> {
    let trimmed = text.trim();
    let rest = trimmed.strip_prefix(prefix)?;
    let mut parts = rest.splitn(2, char::is_whitespace);
    let name = parts.next()?.to_lowercase();
    if name.is_empty() {
        return None;
    }
    let command = Command::parse(&name)?;
    let args = parts.next().unwrap_or("").trim().to_string();
    Some(ParsedCommand { command, args })
}

/// How the dispatcher disposed of one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Not a command, or an unknown command name.
    Ignored,
    /// Dropped silently by the global rate limiter.
    RateLimited,
    /// Rejected with a user-visible wait hint.
    CooldownRejected { remaining_secs: u64 },
    /// Handler completed and replied inline.
    Replied(Command),
    /// Handler acknowledged and continues in a background task.
    Spawned(Command),
    /// Handler failed; a generic failure reply was attempted.
    Failed(Command),
}

/// Command dispatcher. Owns the durable per-process state (cooldowns, rate
/// window, premium roster, counters); the transport handle is passed per
/// call because it changes across reconnects.
pub struct Dispatcher {
    runner: Arc<dyn TaskRunner>,
    rate: Arc<RateGuard>,
    stats: Arc<Stats>,
    premium: Mutex<HashMap<String, DateTime<Utc>>>,
    prefix: char,
    admin_id: Option<String>,
    vcard_path: PathBuf,
    model_label: String,
    ai_timeout: Duration,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        runner: Arc<dyn TaskRunner>,
        rate: Arc<RateGuard>,
        stats: Arc<Stats>,
        prefix: char,
        admin_id: Option<String>,
        vcard_path: PathBuf,
        model_label: String,
        ai_timeout: Duration,
    ) -> Self {
        Self {
            runner,
            rate,
            stats,
            premium: Mutex::new(HashMap::new()),
            prefix,
            admin_id,
            vcard_path,
            model_label,
            ai_timeout,
        }
    }

    /// Premium expiry for an identifier, if a grant is active.
    pub fn premium_until(&self, id: &str) -> Option<DateTime<Utc>> {
        self.premium
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .copied()
    }

    /// Dispatch one normalized message.
    pub async fn dispatch(
        self: &Arc<Self>,
        transport: &Arc<dyn Transport>,
        msg: &InboundMessage,
    ) -> DispatchOutcome {
        let Some(parsed) = parse_command(&msg.text, self.prefix) else {
            return DispatchOutcome::Ignored;
        };

        if !self.rate.check_global() {
            tracing::debug!(command = parsed.command.name(), sender = %msg.sender_id,
                "global rate ceiling hit, dropping command");
            return DispatchOutcome::RateLimited;
        }

        let cooldown = self.rate.check_cooldown(&msg.sender_id);
        if !cooldown.allowed {
            let remaining_secs = cooldown.remaining.as_secs_f64().ceil() as u64;
            if let Err(e) = self
                .reply(
                    transport,
                    &msg.chat_id,
                    &format!("Please wait {remaining_secs}s before the next command."),
                )
                .await
            {
                tracing::debug!(chat = %msg.chat_id, "failed to deliver cooldown notice: {e}");
            }
            return DispatchOutcome::CooldownRejected { remaining_secs };
        }

        self.stats.note_command();
        tracing::info!(command = parsed.command.name(), chat = %msg.chat_id,
            sender = %msg.sender_id, group = msg.is_group, "running command");

        match self.run_handler(transport, msg, &parsed).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(command = parsed.command.name(), "handler failed: {e}");
                if let Err(e) = self
                    .reply(
                        transport,
                        &msg.chat_id,
                        "Something went wrong handling that command. Try again later.",
                    )
                    .await
                {
                    tracing::debug!(chat = %msg.chat_id, "failed to deliver failure notice: {e}");
                }
                DispatchOutcome::Failed(parsed.command)
            }
        }
    }

    async fn run_handler(
        self: &Arc<Self>,
        transport: &Arc<dyn Transport>,
        msg: &InboundMessage,
        parsed: &ParsedCommand,
    ) -> Result<DispatchOutcome, DispatchError> {
        match parsed.command {
            Command::Ai => self.handle_ai(transport, msg, &parsed.args).await,
            Command::Vcf => self.handle_vcf(transport, msg).await,
            Command::Stats => {
                self.reply(transport, &msg.chat_id, &self.stats.report())
                    .await?;
                Ok(DispatchOutcome::Replied(Command::Stats))
            }
            Command::Help => {
                let text = self.help_text();
                self.reply(transport, &msg.chat_id, &text).await?;
                Ok(DispatchOutcome::Replied(Command::Help))
            }
            Command::Premium => self.handle_premium(transport, msg, &parsed.args).await,
        }
    }

    /// The AI command. Long-running: after the acknowledgement the external
    /// task runs off the ingest path so other chats keep flowing.
    async fn handle_ai(
        self: &Arc<Self>,
        transport: &Arc<dyn Transport>,
        msg: &InboundMessage,
        args: &str,
    ) -> Result<DispatchOutcome, DispatchError> {
        if args.is_empty() {
            self.reply(
                transport,
                &msg.chat_id,
                &format!("Ask a question, e.g. {}ai what is AI?", self.prefix),
            )
            .await?;
            return Ok(DispatchOutcome::Replied(Command::Ai));
        }

        if args.eq_ignore_ascii_case("status") {
            let ready = self.runner.check_model().await;
            let text = if ready {
                format!("Model {} is ready.", self.model_label)
            } else {
                format!("Model {} is not available.", self.model_label)
            };
            self.reply(transport, &msg.chat_id, &text).await?;
            return Ok(DispatchOutcome::Replied(Command::Ai));
        }

        // Three-step choreography: typing indicator, immediate ack, final
        // reply. The task can take minutes; without the ack the bot looks
        // unresponsive.
        transport
            .send_presence(&msg.chat_id, Presence::Composing)
            .await
            .map_err(|e| DispatchError::HandlerFailed {
                command: "ai".to_string(),
                reason: e.to_string(),
            })?;
        let budget_min = (self.ai_timeout.as_secs() + 59) / 60;
        self.reply(
            transport,
            &msg.chat_id,
            &format!("⏳ Processing (up to {budget_min} min)..."),
        )
        .await?;

        let dispatcher = Arc::clone(self);
        let transport = Arc::clone(transport);
        let chat_id = msg.chat_id.clone();
        let question = args.to_string();
        tokio::spawn(async move {
            let outcome = dispatcher.runner.run(&question).await;
            let text = dispatcher.format_ai_reply(&outcome);
            if let Err(e) = dispatcher.reply(&transport, &chat_id, &text).await {
                tracing::warn!(chat = %chat_id, "failed to deliver AI reply: {e}");
            }
            if let Err(e) = transport.send_presence(&chat_id, Presence::Paused).await {
                tracing::debug!(chat = %chat_id, "failed to clear typing indicator: {e}");
            }
        });

        Ok(DispatchOutcome::Spawned(Command::Ai))
    }

    fn format_ai_reply(&self, outcome: &TaskOutcome) -> String {
        format!(
            "🧠 {} ({:.1}s)\n\n{}",
            self.model_label,
            outcome.elapsed_secs(),
            outcome.text
        )
    }

    async fn handle_vcf(
        self: &Arc<Self>,
        transport: &Arc<dyn Transport>,
        msg: &InboundMessage,
    ) -> Result<DispatchOutcome, DispatchError> {
        let card = match ContactCard::load(&self.vcard_path) {
            Ok(card) => card,
            Err(e) => {
                tracing::warn!("contact card unavailable: {e}");
                self.reply(
                    transport,
                    &msg.chat_id,
                    "The contact card is not available. Create a vcard.vcf like:\n\
                     BEGIN:VCARD\nVERSION:3.0\nFN:Contact Name\nTEL:+628123456789\nEND:VCARD",
                )
                .await?;
                return Ok(DispatchOutcome::Replied(Command::Vcf));
            }
        };

        transport
            .send_contact_card(&msg.chat_id, &card.display_name, &card.content)
            .await
            .map_err(|e| DispatchError::HandlerFailed {
                command: "vcf".to_string(),
                reason: e.to_string(),
            })?;
        self.reply(
            transport,
            &msg.chat_id,
            &format!("Contact *{}* sent.", card.display_name),
        )
        .await?;
        Ok(DispatchOutcome::Replied(Command::Vcf))
    }

    /// Administrative premium grant: `premium <target> <days>`.
    async fn handle_premium(
        self: &Arc<Self>,
        transport: &Arc<dyn Transport>,
        msg: &InboundMessage,
        args: &str,
    ) -> Result<DispatchOutcome, DispatchError> {
        if self.admin_id.as_deref() != Some(msg.sender_id.as_str()) {
            self.reply(
                transport,
                &msg.chat_id,
                "You are not allowed to use this command.",
            )
            .await?;
            return Ok(DispatchOutcome::Replied(Command::Premium));
        }

        let mut parts = args.split_whitespace();
        let (Some(target), Some(days)) = (parts.next(), parts.next()) else {
            self.reply(
                transport,
                &msg.chat_id,
                &format!("Usage: {}premium <number> <days>", self.prefix),
            )
            .await?;
            return Ok(DispatchOutcome::Replied(Command::Premium));
        };
        let Ok(days) = days.parse::<u32>() else {
            self.reply(transport, &msg.chat_id, "Days must be a number.")
                .await?;
            return Ok(DispatchOutcome::Replied(Command::Premium));
        };

        let target_id = if target.contains('@') {
            target.to_string()
        } else {
            format!("{}@s.whatsapp.net", target.trim_start_matches('@'))
        };
        let until = Utc::now() + chrono::Duration::days(i64::from(days));
        self.premium
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(target_id.clone(), until);

        let number = target_id.split('@').next().unwrap_or(target);
        let text = format!("Granted premium to @{number} for {days} days.");
        transport
            .send_text_mentioning(&msg.chat_id, &text, &[target_id])
            .await
            .map_err(|e| DispatchError::HandlerFailed {
                command: "premium".to_string(),
                reason: e.to_string(),
            })?;
        self.stats.note_reply();
        Ok(DispatchOutcome::Replied(Command::Premium))
    }

    fn help_text(&self) -> String {
        let p = self.prefix;
        format!(
            "Commands:\n\
             {p}ai <question> — ask the AI ({p}ai status checks the model)\n\
             {p}vcf — receive the contact card\n\
             {p}stats — runtime stats\n\
             {p}help — this list\n\
             {p}premium <number> <days> — admin only"
        )
    }

    /// Send a plain text reply, counting it.
    async fn reply(
        &self,
        transport: &Arc<dyn Transport>,
        chat_id: &str,
        text: &str,
    ) -> Result<(), DispatchError> {
        transport
            .send_text(chat_id, text)
            .await
            .map_err(|e| DispatchError::HandlerFailed {
                command: "reply".to_string(),
                reason: e.to_string(),
            })?;
        self.stats.note_reply();
        Ok(())
    }
}
