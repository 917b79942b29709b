//! Canned prompt handlers.

use std::str::FromStr;

use crate::roles::agent::{prompt_handler, PromptHandler};
use crate::AppError;

/// Greeting the basic-echo responder recognises.
pub const GREETING: &str = "Hello, world";
/// Reply to [`GREETING`].
pub const GREETING_REPLY: &str = "Hello, user";
/// Reply to anything else.
pub const FALLBACK_REPLY: &str = "I don't understand";

/// Answers [`GREETING`] with [`GREETING_REPLY`], anything else with
/// [`FALLBACK_REPLY`].
#[must_use]
pub fn basic_echo() -> PromptHandler {
    prompt_handler(|text: String| async move {
        Ok(if text == GREETING {
            GREETING_REPLY.to_owned()
        } else {
            FALLBACK_REPLY.to_owned()
        })
    })
}

/// Answers with the prompt text unchanged.
#[must_use]
pub fn echo() -> PromptHandler {
    prompt_handler(|text: String| async move { Ok(text) })
}

/// Responder selectable by name (e.g. from the mock agent's command line).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Responder {
    /// [`basic_echo`].
    BasicEcho,
    /// [`echo`].
    Echo,
    /// No handler; every prompt fails with `HandlerNotConfigured`.
    Unconfigured,
}

impl Responder {
    /// The handler this responder stands for, if any.
    #[must_use]
    pub fn handler(self) -> Option<PromptHandler> {
        match self {
            Self::BasicEcho => Some(basic_echo()),
            Self::Echo => Some(echo()),
            Self::Unconfigured => None,
        }
    }
}

impl FromStr for Responder {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "basic-echo" => Ok(Self::BasicEcho),
            "echo" => Ok(Self::Echo),
            "unconfigured" => Ok(Self::Unconfigured),
            other => Err(AppError::Config(format!(
                "unknown responder '{other}' (expected basic-echo, echo, or unconfigured)"
            ))),
        }
    }
}
