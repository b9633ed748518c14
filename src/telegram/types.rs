use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::RelayError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub String);

impl ChatId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Markup dialects understood by the formatter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    MarkdownV2,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::MarkdownV2 => "MarkdownV2",
        }
    }
}

impl FromStr for Dialect {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MarkdownV2" => Ok(Dialect::MarkdownV2),
            other => Err(RelayError::UnsupportedDialect(other.to_string())),
        }
    }
}

/// Body of a `sendMessage` call
#[derive(Debug, Clone, Serialize)]
pub struct Payload<'a> {
    pub chat_id: &'a str,
    pub text: &'a str,
    pub parse_mode: &'a str,
}
