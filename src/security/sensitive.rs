//! Sensitive-data detection and redaction.
//!
//! A registry of `(regex, category)` pairs decides whether text carries
//! credentials. Detection returns the set of categories; redaction replaces
//! every match with `[REDACTED <CATEGORY>]` and leaves everything else intact.
//! A fixed high-risk subset of categories escalates from "redact" to "block".

use std::collections::BTreeSet;
use std::fmt;
use std::ops::Range;
use std::path::Path;

use regex::{NoExpand, Regex};
use serde::{Deserialize, Serialize};

/// Upper bound on redaction passes; a pass that changes nothing ends early.
const MAX_REDACTION_PASSES: usize = 8;

/// Credential categories the filter knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensitiveKind {
    ApiKey,
    AccessToken,
    BearerToken,
    Token,
    AwsAccessKeyId,
    AwsSecret,
    GithubPersonalAccessToken,
    GithubOauthToken,
    GithubUserToken,
    GithubServerToken,
    GithubRefreshToken,
    Password,
    DatabasePassword,
    PrivateKey,
    SshPrivateKey,
    EcPrivateKey,
    DsaPrivateKey,
    PgpPrivateKey,
    SecretKey,
    ClientSecret,
    JwtToken,
    EnvironmentSecret,
    CreditCardNumber,
    Ssn,
    EmailPassword,
}

impl SensitiveKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::ApiKey => "API key",
            Self::AccessToken => "Access token",
            Self::BearerToken => "Bearer token",
            Self::Token => "Token",
            Self::AwsAccessKeyId => "AWS Access Key ID",
            Self::AwsSecret => "AWS Secret",
            Self::GithubPersonalAccessToken => "GitHub Personal Access Token",
            Self::GithubOauthToken => "GitHub OAuth Token",
            Self::GithubUserToken => "GitHub User Token",
            Self::GithubServerToken => "GitHub Server Token",
            Self::GithubRefreshToken => "GitHub Refresh Token",
            Self::Password => "Password",
            Self::DatabasePassword => "Database password",
            Self::PrivateKey => "Private key",
            Self::SshPrivateKey => "SSH private key",
            Self::EcPrivateKey => "EC private key",
            Self::DsaPrivateKey => "DSA private key",
            Self::PgpPrivateKey => "PGP private key",
            Self::SecretKey => "Secret key",
            Self::ClientSecret => "Client secret",
            Self::JwtToken => "JWT token",
            Self::EnvironmentSecret => "Environment secret",
            Self::CreditCardNumber => "Credit card number",
            Self::Ssn => "SSN",
            Self::EmailPassword => "Email password",
        }
    }

    /// Categories severe enough to keep the text away from the model entirely.
    pub fn is_high_risk(self) -> bool {
        matches!(
            self,
            Self::PrivateKey
                | Self::SshPrivateKey
                | Self::EcPrivateKey
                | Self::DsaPrivateKey
                | Self::PgpPrivateKey
                | Self::Password
                | Self::SecretKey
                | Self::ApiKey
                | Self::AccessToken
                | Self::BearerToken
                | Self::JwtToken
                | Self::AwsSecret
                | Self::CreditCardNumber
                | Self::Ssn
        )
    }

    fn placeholder(self) -> String {
        format!("[REDACTED {}]", self.label().to_uppercase())
    }
}

impl fmt::Display for SensitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

const SENSITIVE_PATTERNS: &[(&str, SensitiveKind)] = &[
    // API keys and tokens
    (
        r#"(?i)(api[_-]?key|apikey)\s*[=:]\s*['"]?([a-zA-Z0-9_\-]{20,})['"]?"#,
        SensitiveKind::ApiKey,
    ),
    (
        r#"(?i)(access[_-]?token|accesstoken)\s*[=:]\s*['"]?([a-zA-Z0-9_\-]{20,})['"]?"#,
        SensitiveKind::AccessToken,
    ),
    (r"(?i)(bearer\s+)([a-zA-Z0-9_\-\.]{20,})", SensitiveKind::BearerToken),
    (
        r#"(?i)(token)\s*[=:]\s*['"]?([a-zA-Z0-9_\-]{20,})['"]?"#,
        SensitiveKind::Token,
    ),
    // Cloud keys
    (r"(AKIA[0-9A-Z]{16})", SensitiveKind::AwsAccessKeyId),
    (
        r#"(?i)(aws[_-]?secret[_-]?access[_-]?key)\s*[=:]\s*['"]?([a-zA-Z0-9/+=]{40})['"]?"#,
        SensitiveKind::AwsSecret,
    ),
    // VCS tokens
    (r"(ghp_[a-zA-Z0-9]{36})", SensitiveKind::GithubPersonalAccessToken),
    (r"(gho_[a-zA-Z0-9]{36})", SensitiveKind::GithubOauthToken),
    (r"(ghu_[a-zA-Z0-9]{36})", SensitiveKind::GithubUserToken),
    (r"(ghs_[a-zA-Z0-9]{36})", SensitiveKind::GithubServerToken),
    (r"(ghr_[a-zA-Z0-9]{36})", SensitiveKind::GithubRefreshToken),
    // Passwords
    (
        r#"(?i)(password|passwd|pwd)\s*[=:]\s*['"]?([^\s'"]{8,})['"]?"#,
        SensitiveKind::Password,
    ),
    (
        r#"(?i)(db[_-]?password|database[_-]?password)\s*[=:]\s*['"]?([^\s'"]{4,})['"]?"#,
        SensitiveKind::DatabasePassword,
    ),
    (
        r#"(?i)(mysql[_-]?password|postgres[_-]?password|redis[_-]?password)\s*[=:]\s*['"]?([^\s'"]{4,})['"]?"#,
        SensitiveKind::DatabasePassword,
    ),
    // Private key material
    (r"-----BEGIN\s+(RSA\s+)?PRIVATE\s+KEY-----", SensitiveKind::PrivateKey),
    (r"-----BEGIN\s+OPENSSH\s+PRIVATE\s+KEY-----", SensitiveKind::SshPrivateKey),
    (r"-----BEGIN\s+EC\s+PRIVATE\s+KEY-----", SensitiveKind::EcPrivateKey),
    (r"-----BEGIN\s+DSA\s+PRIVATE\s+KEY-----", SensitiveKind::DsaPrivateKey),
    (r"-----BEGIN\s+PGP\s+PRIVATE\s+KEY\s+BLOCK-----", SensitiveKind::PgpPrivateKey),
    // Secrets
    (
        r#"(?i)(secret[_-]?key|secretkey)\s*[=:]\s*['"]?([a-zA-Z0-9_\-+=]{16,})['"]?"#,
        SensitiveKind::SecretKey,
    ),
    (
        r#"(?i)(private[_-]?key|privatekey)\s*[=:]\s*['"]?([a-zA-Z0-9_\-+=]{16,})['"]?"#,
        SensitiveKind::PrivateKey,
    ),
    (
        r#"(?i)(client[_-]?secret|clientsecret)\s*[=:]\s*['"]?([a-zA-Z0-9_\-]{16,})['"]?"#,
        SensitiveKind::ClientSecret,
    ),
    (
        r"(eyJ[a-zA-Z0-9_\-]*\.eyJ[a-zA-Z0-9_\-]*\.[a-zA-Z0-9_\-]*)",
        SensitiveKind::JwtToken,
    ),
    (
        r#"(?i)(export\s+\w*(?:secret|key|token|password|passwd)\w*\s*=\s*['"]?)([^\s'"]+)"#,
        SensitiveKind::EnvironmentSecret,
    ),
    (
        r"\b(?:4[0-9]{12}(?:[0-9]{3})?|5[1-5][0-9]{14}|3[47][0-9]{13}|3[0-9]{13}|6(?:011|5[0-9]{2})[0-9]{12})\b",
        SensitiveKind::CreditCardNumber,
    ),
    (r"\b\d{3}-\d{2}-\d{4}\b", SensitiveKind::Ssn),
    (r"\b\d{3}\s\d{2}\s\d{4}\b", SensitiveKind::Ssn),
    (
        r#"(?i)(smtp[_-]?password|email[_-]?password|mail[_-]?password)\s*[=:]\s*['"]?([^\s'"]+)['"]?"#,
        SensitiveKind::EmailPassword,
    ),
];

const SENSITIVE_FILE_EXTENSIONS: &[&str] = &[
    "key", "pem", "p12", "pfx", "crt", "cer", "der", "ssh", "gpg", "pgp", "asc", "keystore",
    "jks", "env", "secret", "credentials", "password",
];

const SENSITIVE_FILE_NAMES: &[&str] = &[
    "id_rsa",
    "id_dsa",
    "id_ecdsa",
    "id_ed25519",
    "authorized_keys",
    "known_hosts",
    "ssh_config",
    ".env",
    ".env.local",
    ".env.production",
    ".env.staging",
    "secrets.json",
    "credentials.json",
    "keyfile.json",
    "password.txt",
    "passwords.txt",
    "secrets.txt",
    ".netrc",
    ".pgpass",
    ".my.cnf",
    "wallet.dat",
];

const SENSITIVE_DIRECTORIES: &[&str] = &[
    ".ssh",
    ".gnupg",
    ".aws",
    ".config/gcloud",
    ".docker",
    ".kube",
    ".terraform.d",
];

/// Commands whose output commonly echoes file contents or the environment.
const OUTPUT_READING_COMMANDS: &[&str] = &[
    "cat", "less", "more", "head", "tail", "grep", "awk", "sed", "printenv", "env", "export",
    "set",
];

/// One match of a sensitive pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensitivityFinding {
    pub kind: SensitiveKind,
    pub span: Range<usize>,
}

/// Detects and redacts credential-shaped substrings.
#[derive(Debug, Clone)]
pub struct SensitiveDataFilter {
    patterns: Vec<(Regex, SensitiveKind)>,
}

impl SensitiveDataFilter {
    pub fn new() -> Result<Self, regex::Error> {
        let patterns = SENSITIVE_PATTERNS
            .iter()
            .map(|(p, kind)| Regex::new(p).map(|re| (re, *kind)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Every match of every pattern, in registry order.
    pub fn findings(&self, text: &str) -> Vec<SensitivityFinding> {
        self.patterns
            .iter()
            .flat_map(|(re, kind)| {
                re.find_iter(text).map(move |m| SensitivityFinding {
                    kind: *kind,
                    span: m.range(),
                })
            })
            .collect()
    }

    /// Categories present in `text`. Empty means nothing sensitive.
    pub fn detect(&self, text: &str) -> BTreeSet<SensitiveKind> {
        self.patterns
            .iter()
            .filter(|(re, _)| re.is_match(text))
            .map(|(_, kind)| *kind)
            .collect()
    }

    pub fn contains_sensitive(&self, text: &str) -> bool {
        self.patterns.iter().any(|(re, _)| re.is_match(text))
    }

    /// Replace every match with `[REDACTED <CATEGORY>]`.
    ///
    /// Passes repeat until the text stops changing, so the result is a fixed
    /// point and redacting it again is a no-op.
    pub fn redact(&self, text: &str) -> String {
        let mut current = text.to_string();
        for _ in 0..MAX_REDACTION_PASSES {
            let next = self.redact_once(&current);
            if next == current {
                break;
            }
            current = next;
        }
        current
    }

    fn redact_once(&self, text: &str) -> String {
        let mut out = text.to_string();
        for (re, kind) in &self.patterns {
            let placeholder = kind.placeholder();
            out = re.replace_all(&out, NoExpand(&placeholder)).into_owned();
        }
        out
    }

    /// First high-risk category found, phrased for the user.
    pub fn block_reason(&self, text: &str) -> Option<String> {
        self.detect(text)
            .into_iter()
            .find(|kind| kind.is_high_risk())
            .map(|kind| format!("Contains {}", kind.label().to_lowercase()))
    }

    /// True iff a high-risk category is present. Stricter than [`Self::detect`].
    pub fn should_block(&self, text: &str) -> bool {
        self.block_reason(text).is_some()
    }

    /// The text as it may be handed to the model.
    pub fn sanitize_for_model(&self, text: &str) -> String {
        match self.block_reason(text) {
            Some(reason) => format!("[BLOCKED: {}]", reason),
            None => self.redact(text),
        }
    }

    pub fn redaction_summary(&self, original: &str, filtered: &str) -> String {
        if original == filtered {
            return "No sensitive data detected".to_string();
        }
        let kinds = self.detect(original);
        if kinds.is_empty() {
            "Content filtered for safety".to_string()
        } else {
            let labels: Vec<&str> = kinds.iter().map(|k| k.label()).collect();
            format!("Redacted: {}", labels.join(", "))
        }
    }

    /// Whether a path names key material, env files or credential stores.
    pub fn sensitive_file_reason(&self, path: &str) -> Option<String> {
        let lower = path.to_lowercase();
        let as_path = Path::new(&lower);

        if let Some(ext) = as_path.extension().and_then(|e| e.to_str()) {
            if SENSITIVE_FILE_EXTENSIONS.contains(&ext) {
                return Some(format!("Sensitive file extension: .{}", ext));
            }
        }

        if let Some(name) = as_path.file_name().and_then(|n| n.to_str()) {
            if SENSITIVE_FILE_NAMES.contains(&name) {
                return Some(format!("Sensitive file name: {}", name));
            }
        }

        let parent = Path::new(path)
            .parent()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default();
        SENSITIVE_DIRECTORIES
            .iter()
            .find(|dir| parent.contains(*dir))
            .map(|dir| format!("File in sensitive directory: {}", dir))
    }

    pub fn is_sensitive_file(&self, path: &str) -> bool {
        self.sensitive_file_reason(path).is_some()
    }

    /// Filter the output of `command` before it is shown or forwarded.
    ///
    /// Reading a sensitive file replaces the whole output with one notice;
    /// other output of file-reading and environment commands is redacted.
    pub fn filter_command_output(&self, command: &str, output: &str) -> String {
        let mut parts = command.split_whitespace();
        let Some(base) = parts.next() else {
            return output.to_string();
        };
        if !OUTPUT_READING_COMMANDS.contains(&base) {
            return output.to_string();
        }

        for arg in parts.filter(|p| !p.starts_with('-')) {
            if let Some(reason) = self.sensitive_file_reason(arg) {
                return format!("[REDACTED: Output from {}]", reason);
            }
        }

        self.redact(output)
    }
}
