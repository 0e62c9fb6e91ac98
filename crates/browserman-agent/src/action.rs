//! Actions and the defensive parser that extracts them from model replies.
//!
//! The model is asked to answer with a single-line function tag:
//!
//! ```text
//! <function=navigate_to>{"url": "https://example.com"}</function>
//! ```
//!
//! Replies are free text, so [`parse_action`] only looks for the first
//! recognised tag (by a fixed priority, not by position) and decodes its JSON
//! body. Anything it cannot decode is "no action", never an error.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;
use tracing::debug;

/// A structured directive derived from model output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Navigate { url: String },
    ClickButton { label: String, reason: Option<String> },
    GoBack { reason: Option<String> },
    FinalAnswer { text: String },
}

/// The recognised function names, in parser priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    NavigateTo,
    ClickButton,
    FinalAnswer,
    GoBack,
}

impl ActionKind {
    /// Priority order used when a reply contains more than one tag.
    pub const PRIORITY: [ActionKind; 4] = [
        ActionKind::NavigateTo,
        ActionKind::ClickButton,
        ActionKind::FinalAnswer,
        ActionKind::GoBack,
    ];

    /// Function name as it appears in the tag.
    pub fn name(self) -> &'static str {
        match self {
            Self::NavigateTo => "navigate_to",
            Self::ClickButton => "click_button",
            Self::FinalAnswer => "final_answer",
            Self::GoBack => "go_back",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Payload of a recognised tag could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("{kind}: invalid payload: {source}")]
    Payload {
        kind: ActionKind,
        #[source]
        source: serde_json::Error,
    },

    #[error("{kind}: field '{field}' must not be empty")]
    EmptyField {
        kind: ActionKind,
        field: &'static str,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct NavigatePayload {
    url: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ClickPayload {
    #[serde(alias = "label", alias = "text")]
    button_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct GoBackPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AnswerPayload {
    #[serde(alias = "text")]
    answer: String,
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Navigate { .. } => ActionKind::NavigateTo,
            Self::ClickButton { .. } => ActionKind::ClickButton,
            Self::GoBack { .. } => ActionKind::GoBack,
            Self::FinalAnswer { .. } => ActionKind::FinalAnswer,
        }
    }

    /// Navigation-type actions re-enable click offers once they succeed.
    pub fn is_navigation(&self) -> bool {
        matches!(self, Self::Navigate { .. } | Self::GoBack { .. })
    }

    /// Decode the body of a `<function=NAME>` tag into a validated action.
    pub fn decode(kind: ActionKind, body: &str) -> Result<Self, ParseError> {
        let body = body.trim();
        // go_back takes no required arguments, so an empty body is fine
        let body = if body.is_empty() { "{}" } else { body };
        let payload = |source| ParseError::Payload { kind, source };

        let action = match kind {
            ActionKind::NavigateTo => {
                let p: NavigatePayload = serde_json::from_str(body).map_err(payload)?;
                Self::Navigate {
                    url: non_empty(kind, "url", p.url)?,
                }
            }
            ActionKind::ClickButton => {
                let p: ClickPayload = serde_json::from_str(body).map_err(payload)?;
                Self::ClickButton {
                    label: non_empty(kind, "button_text", p.button_text)?,
                    reason: p.reason,
                }
            }
            ActionKind::FinalAnswer => {
                let p: AnswerPayload = serde_json::from_str(body).map_err(payload)?;
                Self::FinalAnswer { text: p.answer }
            }
            ActionKind::GoBack => {
                let p: GoBackPayload = serde_json::from_str(body).map_err(payload)?;
                Self::GoBack { reason: p.reason }
            }
        };
        Ok(action)
    }

    fn payload_json(&self) -> String {
        let value = match self {
            Self::Navigate { url } => serde_json::to_string(&NavigatePayload { url: url.clone() }),
            Self::ClickButton { label, reason } => serde_json::to_string(&ClickPayload {
                button_text: label.clone(),
                reason: reason.clone(),
            }),
            Self::GoBack { reason } => serde_json::to_string(&GoBackPayload {
                reason: reason.clone(),
            }),
            Self::FinalAnswer { text } => serde_json::to_string(&AnswerPayload {
                answer: text.clone(),
            }),
        };
        // Serializing plain string structs cannot fail
        value.unwrap_or_else(|_| "{}".to_string())
    }
}

/// Wire form: `<function=NAME>{json}</function>`.
impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<function={}>{}</function>",
            self.kind().name(),
            self.payload_json()
        )
    }
}

fn non_empty(kind: ActionKind, field: &'static str, value: String) -> Result<String, ParseError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ParseError::EmptyField { kind, field });
    }
    Ok(trimmed.to_string())
}

static TAGS: LazyLock<Vec<(ActionKind, Regex)>> = LazyLock::new(|| {
    ActionKind::PRIORITY
        .iter()
        .map(|&kind| {
            let pattern = format!(
                r"<function\s*=\s*{}\s*>(.*?)(?:</function>|$)",
                regex::escape(kind.name())
            );
            // Pattern is built from fixed names, always valid
            (kind, Regex::new(&pattern).expect("valid tag pattern"))
        })
        .collect()
});

/// Locate a tag and return its raw body, without decoding.
fn find_tag(line: &str) -> Option<(ActionKind, &str)> {
    TAGS.iter().find_map(|(kind, re)| {
        re.captures(line)
            .and_then(|c| c.get(1))
            .map(|m| (*kind, m.as_str()))
    })
}

/// Extract an action from raw model output.
///
/// Only the first line is considered; the model often keeps talking after
/// the call. Returns `None` when no recognised tag is present or when the
/// first recognised tag has a malformed payload.
pub fn parse_action(output: &str) -> Option<Action> {
    let line = output.lines().next().unwrap_or("");
    let (kind, body) = find_tag(line)?;
    match Action::decode(kind, body) {
        Ok(action) => Some(action),
        Err(e) => {
            debug!("discarding model reply: {}", e);
            None
        }
    }
}
