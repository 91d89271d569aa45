//! Plain-text transcript export.
//!
//! A transcript is a list of exchanges: each user message paired with the
//! assistant message directly following it, if any. Assistant messages that do
//! not answer a question are left out, as is the loading placeholder.

use std::fmt::Write as _;

use chrono::NaiveDate;

use crate::chat::core::markup::Markup;
use crate::chat::core::message::{Message, Sender};
use crate::chat::core::thread::Thread;

/// Transcript heading.
pub const HEADING: &str = "MedLife.AI - Chat History";

/// One question and its answer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Exchange<'a> {
    /// The user message.
    pub question: &'a Message,
    /// The assistant message that followed, if any.
    pub answer: Option<&'a Message>,
}

/// Pair each user message with the assistant message right after it.
#[must_use]
pub fn pair_exchanges(messages: &[Message]) -> Vec<Exchange<'_>> {
    let visible: Vec<&Message> = messages.iter().filter(|m| !m.is_loading()).collect();
    let mut exchanges = Vec::new();
    let mut i = 0;
    while i < visible.len() {
        let message = visible[i];
        i += 1;
        if message.sender != Sender::User {
            continue;
        }
        let answer = visible
            .get(i)
            .copied()
            .filter(|next| next.sender == Sender::Assistant);
        if answer.is_some() {
            i += 1;
        }
        exchanges.push(Exchange {
            question: message,
            answer,
        });
    }
    exchanges
}

/// Export file name: `Chat_History_<member>.txt` with whitespace runs turned
/// into `_`, or `Chat_History_<YYYY-MM-DD>.txt` without a member.
#[must_use]
pub fn export_file_name(member_name: Option<&str>, date: NaiveDate) -> String {
    let stem = member_name
        .map(|name| name.split_whitespace().collect::<Vec<_>>().join("_"))
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| date.format("%Y-%m-%d").to_string());
    format!("Chat_History_{stem}.txt")
}

/// A rendered transcript.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TranscriptExport {
    /// Suggested file name.
    pub file_name: String,
    /// Transcript text.
    pub body: String,
}

impl TranscriptExport {
    /// Render `thread` as plain text.
    #[must_use]
    pub fn render(
        thread: &Thread,
        member_name: Option<&str>,
        markup: &Markup,
        generated_on: NaiveDate,
    ) -> Self {
        let mut body = String::new();
        let _ = writeln!(body, "{HEADING}");
        let _ = writeln!(body, "Generated on: {}", generated_on.format("%Y-%m-%d"));
        let _ = writeln!(body, "Thread: {}", thread.name);
        if let Some(member) = member_name {
            let _ = writeln!(body, "Member: {member}");
        }

        for exchange in pair_exchanges(&thread.messages) {
            body.push('\n');
            push_line(&mut body, exchange.question, markup);
            if let Some(answer) = exchange.answer {
                push_line(&mut body, answer, markup);
            }
        }

        Self {
            file_name: export_file_name(member_name, generated_on),
            body,
        }
    }
}

fn push_line(body: &mut String, message: &Message, markup: &Markup) {
    let _ = writeln!(body, "{}: {}", message.name, markup.to_plain_text(&message.text));
}
