//! Loads the contact card served by the vcf command.
//!
//! The card itself is authored out-of-band; this module only validates the
//! envelope and pulls a display name out of the `FN` property.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

const DEFAULT_DISPLAY_NAME: &str = "Contact";

/// A loaded, minimally validated vCard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactCard {
    /// Raw vCard text, passed to the transport verbatim.
    pub content: String,
    /// Display name extracted from the `FN` property.
    pub display_name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum VcardError {
    #[error("vCard file not found at {0}")]
    NotFound(String),

    #[error("vCard file is missing BEGIN:VCARD/END:VCARD markers")]
    InvalidFormat,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn fn_property() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // FN may carry parameters, e.g. `FN;CHARSET=UTF-8:Name`
    RE.get_or_init(|| Regex::new(r"(?im)^FN[^:]*:([^\r\n]+)").unwrap())
}

impl ContactCard {
    /// Load and validate the vCard at `path`.
    pub fn load(path: &Path) -> Result<Self, VcardError> {
        if !path.exists() {
            return Err(VcardError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        if !content.contains("BEGIN:VCARD") || !content.contains("END:VCARD") {
            return Err(VcardError::InvalidFormat);
        }

        let display_name = fn_property()
            .captures(&content)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().replace(';', " ").trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string());

        Ok(Self {
            content,
            display_name,
        })
    }
}
