//! Minimal built-in patterns used when the full filters cannot be built.
//!
//! The guard only ever blocks. It never redacts or asks for confirmation.

use regex::{Regex, RegexBuilder};

const DESTRUCTIVE_PATTERNS: &[&str] = &[
    r"\b(rm\s+-rf|del\s+/s|format\s+|fdisk|mkfs)\b",
    r"\b(shutdown|reboot|halt|poweroff)\b",
    r"\b(dd\s+if=.*of=.*|cat\s+.*>\s*/dev/)",
];

const CREDENTIAL_PATTERNS: &[(&str, &str)] = &[
    (r#"api[_-]?key["\s]*[:=]["\s]*([a-zA-Z0-9_\-]{20,})"#, "API key"),
    (r#"password["\s]*[:=]["\s]*([^\s]{6,})"#, "Password"),
    (r"-----BEGIN\s+(?:RSA\s+)?PRIVATE\s+KEY-----", "Private key"),
];

/// What the fallback guard matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackHit {
    Destructive { pattern: String },
    Credential { label: &'static str },
}

#[derive(Debug, Clone)]
pub struct FallbackGuard {
    destructive: Vec<Regex>,
    credentials: Vec<(Regex, &'static str)>,
}

fn compile(pattern: &str) -> Option<Regex> {
    RegexBuilder::new(pattern).case_insensitive(true).build().ok()
}

impl Default for FallbackGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl FallbackGuard {
    pub fn new() -> Self {
        Self {
            destructive: DESTRUCTIVE_PATTERNS.iter().filter_map(|p| compile(p)).collect(),
            credentials: CREDENTIAL_PATTERNS
                .iter()
                .filter_map(|(p, label)| compile(p).map(|re| (re, *label)))
                .collect(),
        }
    }

    /// First match, destructive commands before credentials.
    pub fn check(&self, text: &str) -> Option<FallbackHit> {
        if let Some(re) = self.destructive.iter().find(|re| re.is_match(text)) {
            return Some(FallbackHit::Destructive {
                pattern: re.as_str().to_string(),
            });
        }
        self.credentials
            .iter()
            .find(|(re, _)| re.is_match(text))
            .map(|(_, label)| FallbackHit::Credential { label })
    }
}
