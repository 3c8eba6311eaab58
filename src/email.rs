use crate::domain_utils::DomainUtils;
use crate::error::ScoringError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub mime_type: Option<String>,
    /// Hex SHA-256 of the payload when the parser computed one.
    #[serde(default)]
    pub sha256: Option<String>,
}

/// Structured email handed over by the parsing collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedEmail {
    /// Envelope sender, when known. Falls back to the From header.
    #[serde(default)]
    pub sender: Option<String>,
    pub body: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub has_html: bool,
    #[serde(default)]
    pub has_forms: bool,
    #[serde(default)]
    pub has_scripts: bool,
    #[serde(default)]
    pub has_iframes: bool,
}

impl ParsedEmail {
    pub fn from_json(raw: &str) -> Result<Self, ScoringError> {
        let email: ParsedEmail = serde_json::from_str(raw)
            .map_err(|e| ScoringError::MalformedInput(e.to_string()))?;
        email.validate()?;
        Ok(email)
    }

    /// Reject records the parser should never have produced.
    pub fn validate(&self) -> Result<(), ScoringError> {
        if self.headers.keys().any(|k| k.trim().is_empty()) {
            return Err(ScoringError::MalformedInput(
                "header with empty name".to_string(),
            ));
        }
        if let Some(pos) = self.urls.iter().position(|u| u.trim().is_empty()) {
            return Err(ScoringError::MalformedInput(format!(
                "url #{pos} is empty"
            )));
        }
        if let Some(pos) = self.attachments.iter().position(|a| a.name.trim().is_empty()) {
            return Err(ScoringError::MalformedInput(format!(
                "attachment #{pos} has no name"
            )));
        }
        Ok(())
    }

    /// Case-insensitive header lookup. When several spellings of the same
    /// name are present, the smallest key wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        let wanted = name.to_lowercase();
        self.headers
            .iter()
            .filter(|(k, _)| k.to_lowercase() == wanted)
            .min_by(|a, b| a.0.cmp(b.0))
            .map(|(_, v)| v.as_str())
    }

    /// Sender address used for allow/deny matching, lowercased.
    pub fn sender_address(&self) -> Option<String> {
        self.sender
            .as_deref()
            .and_then(DomainUtils::extract_email_from_header)
            .or_else(|| {
                self.header("From")
                    .and_then(DomainUtils::extract_email_from_header)
            })
    }

    pub fn sender_domain(&self) -> Option<String> {
        self.sender_address()
            .and_then(|addr| DomainUtils::extract_domain(&addr))
    }
}
