//! Feedback formatting for model prompts
//!
//! Diagnostics are emitted liberally upstream, blank entries included. The
//! helpers here drop anything empty after trimming so none of it reaches
//! the model.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::LazyLock;

pub const FEEDBACK_START: &str = "[Feedback Start]";
pub const FEEDBACK_END: &str = "[Feedback End]";

/// Line/column suffixes such as `:[55,31]`, `:13:5` or `:13:`
static POSITION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":\[\d+,\d+\]|:\d+:\d+|:\d+:").unwrap());

/// Delimiter layout for a wrapped message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackStyle {
    /// `[Feedback Start]msg[Feedback End]`
    #[default]
    SingleLine,
    /// Delimiters on their own lines
    MultiLine,
}

impl FeedbackStyle {
    pub fn wrap(self, message: &str) -> String {
        match self {
            Self::SingleLine => format!("{FEEDBACK_START}{message}{FEEDBACK_END}"),
            Self::MultiLine => format!("{FEEDBACK_START}\n{message}\n{FEEDBACK_END}"),
        }
    }
}

/// Wrap one message with the default delimiters; `None` if it is blank.
pub fn format_one(message: &str) -> Option<String> {
    format_one_with(message, |m| FeedbackStyle::SingleLine.wrap(m))
}

/// Trim `message` and apply `format` unless nothing is left.
pub fn format_one_with<F>(message: &str, format: F) -> Option<String>
where
    F: Fn(&str) -> String,
{
    let message = message.trim();
    if message.is_empty() {
        None
    } else {
        Some(format(message))
    }
}

pub fn format_many<S: AsRef<str>>(messages: &[S]) -> Option<String> {
    format_many_with(messages, |m| FeedbackStyle::SingleLine.wrap(m))
}

/// Format each message in order, drop blanks, join survivors with `\n`.
pub fn format_many_with<S, F>(messages: &[S], format: F) -> Option<String>
where
    S: AsRef<str>,
    F: Fn(&str) -> String,
{
    let parts: Vec<String> = messages
        .iter()
        .filter_map(|m| format_one_with(m.as_ref(), &format))
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n"))
    }
}

// ============================================================================
// Build progress
// ============================================================================

/// How the error set is expected to move between consecutive failed builds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorChangePolicy {
    #[default]
    None,
    /// The errors must not be exactly the same as last time
    DifferentFromBefore,
    /// There must not be more errors than last time, and apart from the
    /// leading entry none of them may be new
    NonIncreasing,
    /// There must be fewer errors, none of them new
    Decreasing,
}

pub const ERRORS_UNCHANGED: &str =
    "The build errors are all the same as before, after applying the suggested changes.";
pub const ERRORS_INCREASED: &str =
    "There are more build errors than before, after applying the suggested changes.";
pub const ERRORS_NOT_DECREASING: &str =
    "The build errors don't decrease after applying the suggested changes.";

impl ErrorChangePolicy {
    /// Progress note when `latest` violates the policy relative to
    /// `previous`. Positions are ignored; blank entries never count.
    pub fn check(self, previous: &[String], latest: &[String]) -> Option<&'static str> {
        let previous = normalized(previous);
        let latest = normalized(latest);
        if previous.is_empty() {
            return None;
        }

        match self {
            Self::None => None,
            Self::DifferentFromBefore => {
                let mut before = previous.clone();
                let mut after = latest.clone();
                before.sort();
                after.sort();
                (before == after).then_some(ERRORS_UNCHANGED)
            }
            // The leading entry may be the one the patch was aimed at.
            Self::NonIncreasing => {
                let rest = latest.get(1..).unwrap_or_default();
                (!shrank_without_new(&previous, rest)).then_some(ERRORS_INCREASED)
            }
            Self::Decreasing => {
                (!shrank_without_new(&previous, &latest)).then_some(ERRORS_NOT_DECREASING)
            }
        }
    }
}

/// `latest` is shorter than `previous` and holds no entry absent from it.
fn shrank_without_new(previous: &[String], latest: &[String]) -> bool {
    let seen: HashSet<&String> = previous.iter().collect();
    latest.len() < previous.len() && latest.iter().all(|e| seen.contains(e))
}

fn normalized(entries: &[String]) -> Vec<String> {
    entries
        .iter()
        .map(|e| e.trim())
        .filter(|e| !e.is_empty())
        .map(|e| POSITION.replace_all(e, ":").into_owned())
        .collect()
}
