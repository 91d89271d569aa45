//! Startup helpers for the `medlife-chat` terminal client.
//!
//! The client reads the identity from `MEDLIFE_EMAIL` (or asks for it), loads
//! the session and then reads one line at a time: plain lines are sent to the
//! assistant, lines starting with `/` are commands.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, bail};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use crate::chat::core::config::ChatConfig;
use crate::chat::core::ids::ThreadId;
use crate::chat::core::markup::Markup;
use crate::chat::core::message::Message;
use crate::chat::core::provider::Provider;
use crate::chat::session::{ChatSession, GateReason, SendOutcome};
use crate::chat::suggestions;

/// Environment variable holding the identity to sign in with.
pub const EMAIL_ENV: &str = "MEDLIFE_EMAIL";

const HELP: &str = "\
Commands:
  /new                      start a new thread
  /threads                  list threads
  /select <n>               switch to thread n
  /rename <name>            rename the current thread
  /delete                   delete the current thread
  /key <provider> <secret>  save an API key (empty secret removes it)
  /provider <name>          use another provider
  /members                  list members
  /member <n>               chat about member n
  /sync                     push every thread to the server now
  /export [path]            write the current thread as text
  /questions                show suggested questions
  /login <email>            switch identity
  /logout                   forget keys and sign out
  /help                     show this help
  /quit                     exit
Anything else is sent to the assistant.";

/// Run the terminal client (used by the `medlife-chat` binary).
///
/// # Returns
/// `ExitCode::SUCCESS` on a clean exit, `1` on failure.
#[must_use]
pub fn run() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Starting Medlife chat v{}", env!("CARGO_PKG_VERSION"));

    let config = ChatConfig::from_env();
    if let Err(e) = config.validate() {
        tracing::error!("Invalid configuration: {e}");
        return ExitCode::from(1);
    }

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    if let Err(e) = rt.block_on(run_repl(&config)) {
        tracing::error!("Chat client error: {e:#}");
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}

/// One parsed input line.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Command {
    Send(String),
    New,
    Threads,
    Select(usize),
    Rename(String),
    Delete,
    Key { provider: String, secret: String },
    Provider(String),
    Members,
    Member(usize),
    Sync,
    Export(Option<PathBuf>),
    Questions,
    Login(String),
    Logout,
    Help,
    Quit,
    Invalid(String),
}

impl Command {
    fn parse(line: &str) -> Self {
        let line = line.trim();
        let Some(rest) = line.strip_prefix('/') else {
            return Self::Send(line.to_string());
        };
        let (name, arg) = rest
            .split_once(char::is_whitespace)
            .map_or((rest, ""), |(n, a)| (n, a.trim()));

        match (name, arg) {
            ("new", "") => Self::New,
            ("threads", "") => Self::Threads,
            ("select", n) => Self::index(n).map_or_else(|| Self::usage("/select <n>"), Self::Select),
            ("rename", name) if !name.is_empty() => Self::Rename(name.to_string()),
            ("delete", "") => Self::Delete,
            ("key", arg) => match arg.split_once(char::is_whitespace) {
                Some((provider, secret)) => Self::Key {
                    provider: provider.to_string(),
                    secret: secret.trim().to_string(),
                },
                None if !arg.is_empty() => Self::Key {
                    provider: arg.to_string(),
                    secret: String::new(),
                },
                None => Self::usage("/key <provider> <secret>"),
            },
            ("provider", name) if !name.is_empty() => Self::Provider(name.to_string()),
            ("members", "") => Self::Members,
            ("member", n) => Self::index(n).map_or_else(|| Self::usage("/member <n>"), Self::Member),
            ("sync", "") => Self::Sync,
            ("export", "") => Self::Export(None),
            ("export", path) => Self::Export(Some(PathBuf::from(path))),
            ("questions", "") => Self::Questions,
            ("login", email) if !email.is_empty() => Self::Login(email.to_string()),
            ("logout", "") => Self::Logout,
            ("help", _) => Self::Help,
            ("quit" | "exit", _) => Self::Quit,
            _ => Self::Invalid(format!("unknown command: {line} (try /help)")),
        }
    }

    fn index(arg: &str) -> Option<usize> {
        arg.parse::<usize>().ok().filter(|n| *n > 0)
    }

    fn usage(text: &str) -> Self {
        Self::Invalid(format!("usage: {text}"))
    }
}

struct Repl<W: Write> {
    session: ChatSession,
    markup: Markup,
    out: W,
}

async fn run_repl(config: &ChatConfig) -> anyhow::Result<()> {
    let session = ChatSession::open(config).context("failed to open chat session")?;
    let mut repl = Repl {
        session,
        markup: Markup::new()?,
        out: std::io::stdout(),
    };
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let email = match std::env::var(EMAIL_ENV) {
        Ok(email) if !email.trim().is_empty() => email,
        _ => {
            write!(repl.out, "Email: ")?;
            repl.out.flush()?;
            read_line(&mut lines).await?.unwrap_or_default()
        }
    };
    repl.login(&email).await?;
    writeln!(repl.out, "{HELP}")?;

    while let Some(line) = read_line(&mut lines).await? {
        if line.trim().is_empty() {
            continue;
        }
        let command = Command::parse(&line);
        if command == Command::Quit {
            break;
        }
        if let Err(e) = repl.execute(command).await {
            writeln!(repl.out, "error: {e:#}")?;
        }
    }

    repl.session.flush().await;
    Ok(())
}

async fn read_line(lines: &mut Lines<BufReader<Stdin>>) -> anyhow::Result<Option<String>> {
    Ok(lines.next_line().await?)
}

impl<W: Write> Repl<W> {
    async fn execute(&mut self, command: Command) -> anyhow::Result<()> {
        match command {
            Command::Send(text) => self.send(&text).await?,
            Command::New => {
                self.session.new_thread().await?;
                writeln!(self.out, "Started a new thread.")?;
            }
            Command::Threads => self.list_threads().await?,
            Command::Select(n) => self.select_thread(n).await?,
            Command::Rename(name) => {
                let id = self.active_id().await?;
                self.session.rename_thread(&id, &name).await?;
            }
            Command::Delete => {
                let id = self.active_id().await?;
                self.session.delete_thread(&id).await?;
                writeln!(self.out, "Thread deleted.")?;
            }
            Command::Key { provider, secret } => self.save_key(&provider, &secret).await?,
            Command::Provider(name) => self.use_provider(&name).await?,
            Command::Members => self.list_members().await?,
            Command::Member(n) => self.select_member(n).await?,
            Command::Sync => {
                self.session.sync_now().await?;
                writeln!(self.out, "Chats saved to the server.")?;
            }
            Command::Export(path) => self.export(path).await?,
            Command::Questions => {
                for question in suggestions::all() {
                    writeln!(self.out, "  - {question}")?;
                }
            }
            Command::Login(email) => self.login(&email).await?,
            Command::Logout => {
                self.session.sign_out().await?;
                writeln!(self.out, "Signed out. Use /login <email> to continue.")?;
            }
            Command::Help => writeln!(self.out, "{HELP}")?,
            Command::Invalid(reason) => writeln!(self.out, "{reason}")?,
            Command::Quit => {}
        }
        Ok(())
    }

    async fn select_thread(&mut self, n: usize) -> anyhow::Result<()> {
        let threads = self.session.threads().await;
        let Some(thread) = threads.get(n - 1) else {
            bail!("no thread {n}");
        };
        self.session.select_thread(&thread.id).await;
        writeln!(self.out, "== {} ==", thread.name)?;
        for message in &thread.messages {
            self.print_message(message)?;
        }
        Ok(())
    }

    async fn save_key(&mut self, provider: &str, secret: &str) -> anyhow::Result<()> {
        let provider: Provider = provider.parse()?;
        if self.session.save_credential(provider, secret).await? {
            writeln!(self.out, "Using {}.", provider.display_name())?;
        } else {
            writeln!(self.out, "Removed the {} key.", provider.display_name())?;
        }
        Ok(())
    }

    async fn use_provider(&mut self, name: &str) -> anyhow::Result<()> {
        let provider: Provider = name.parse()?;
        if !self.session.select_provider(provider).await? {
            bail!("no key saved for {}", provider.display_name());
        }
        writeln!(self.out, "Using {}.", provider.display_name())?;
        Ok(())
    }

    async fn list_members(&mut self) -> anyhow::Result<()> {
        let members = self.session.load_members().await?;
        if members.is_empty() {
            writeln!(self.out, "No members.")?;
        }
        for (i, member) in members.iter().enumerate() {
            writeln!(self.out, "{:>3}. {}", i + 1, member.display_name())?;
        }
        Ok(())
    }

    async fn select_member(&mut self, n: usize) -> anyhow::Result<()> {
        let members = self.session.members().await;
        let Some(member) = members.get(n - 1) else {
            bail!("no member {n}, run /members first");
        };
        writeln!(self.out, "Chatting about {}.", member.display_name())?;
        self.session.select_member(member.clone()).await;
        Ok(())
    }

    async fn export(&mut self, path: Option<PathBuf>) -> anyhow::Result<()> {
        let today = chrono::Local::now().date_naive();
        let Some(export) = self.session.export_active(today).await else {
            bail!("no thread selected");
        };
        let path = path.unwrap_or_else(|| PathBuf::from(&export.file_name));
        std::fs::write(&path, export.body)
            .with_context(|| format!("failed to write {}", path.display()))?;
        writeln!(self.out, "Wrote {}.", path.display())?;
        Ok(())
    }

    async fn login(&mut self, email: &str) -> anyhow::Result<()> {
        let report = self.session.load(email).await?;
        writeln!(
            self.out,
            "Signed in as {}. {} thread(s).",
            email.trim(),
            report.thread_count
        )?;
        if self.session.credential_prompt_pending().await {
            writeln!(
                self.out,
                "No API key saved yet. Add one with /key <provider> <secret>."
            )?;
        }
        if let Some(provider) = self.session.selected_provider().await {
            writeln!(self.out, "Using {}.", provider.display_name())?;
        }
        Ok(())
    }

    async fn send(&mut self, text: &str) -> anyhow::Result<()> {
        let outcome = self.session.send_message(text).await?;
        let thread = match outcome {
            SendOutcome::Gated(reason) => {
                writeln!(self.out, "{}", gate_hint(reason))?;
                return Ok(());
            }
            SendOutcome::Discarded { .. } => {
                writeln!(self.out, "The thread was deleted before the reply arrived.")?;
                return Ok(());
            }
            SendOutcome::Replied { ref thread } | SendOutcome::Failed { ref thread, .. } => {
                thread.clone()
            }
        };

        let threads = self.session.threads().await;
        if let Some(reply) = threads
            .iter()
            .find(|t| t.id == thread)
            .and_then(|t| t.messages.last())
        {
            self.print_message(reply)?;
        }
        if outcome.needs_credential() {
            writeln!(self.out, "Update your key with /key <provider> <secret>.")?;
        }
        Ok(())
    }

    async fn list_threads(&mut self) -> anyhow::Result<()> {
        let threads = self.session.threads().await;
        let active = self.session.active_thread().await.map(|t| t.id);
        if threads.is_empty() {
            writeln!(self.out, "No threads. Use /new to start one.")?;
        }
        for (i, thread) in threads.iter().enumerate() {
            let marker = if active.as_ref() == Some(&thread.id) { '*' } else { ' ' };
            writeln!(
                self.out,
                "{marker}{:>3}. {} ({} messages)",
                i + 1,
                thread.name,
                thread.messages.len()
            )?;
        }
        Ok(())
    }

    async fn active_id(&self) -> anyhow::Result<ThreadId> {
        match self.session.active_thread().await {
            Some(thread) => Ok(thread.id),
            None => bail!("no thread selected"),
        }
    }

    fn print_message(&mut self, message: &Message) -> anyhow::Result<()> {
        writeln!(
            self.out,
            "{}: {}",
            message.name,
            self.markup.to_plain_text(&message.text)
        )?;
        Ok(())
    }
}

const fn gate_hint(reason: GateReason) -> &'static str {
    match reason {
        GateReason::EmptyInput => "Type a question first.",
        GateReason::NoMember => "Pick a member first with /members and /member <n>.",
        GateReason::MissingCredential => "Add an API key first with /key <provider> <secret>.",
        GateReason::NoActiveThread => "No thread selected. Use /new to start one.",
        GateReason::AwaitingReply => "Still waiting for the previous reply.",
    }
}
