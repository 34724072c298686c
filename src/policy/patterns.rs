//! Pattern matching helpers for the policy engine.

use std::path::{Component, Path, PathBuf};

use regex::{Regex, RegexBuilder};

/// Always enforced, whatever the rule document says.
pub(super) const CRITICAL_SECURITY_PATTERNS: &[(&str, &str)] = &[
    // Privilege escalation
    (r"sudo\s+su\s*-", "Privilege escalation attempt"),
    (r"sudo\s+.*passwd\s+root", "Root password change attempt"),
    (r"chmod\s+[47]77", "Dangerous permission setting"),
    // System modification
    (r"rm\s+-rf\s+/", "Dangerous recursive delete"),
    (r"rm\s+-rf\s+\*", "Dangerous wildcard delete"),
    (r"dd\s+if=.*of=/dev/", "Direct device write attempt"),
    (r"mkfs\s+", "Filesystem creation attempt"),
    // Network
    (r"nc\s+.*-l.*-e", "Netcat backdoor attempt"),
    (r"bash\s+-i\s+>&", "Reverse shell attempt"),
    (r"python.*socket.*exec", "Python reverse shell attempt"),
    // Credential access
    (r"cat\s+.*shadow", "Shadow file access attempt"),
    (r"cat\s+.*passwd", "Password file access attempt"),
    (r"grep\s+.*password.*\*", "Password search attempt"),
    // Process manipulation
    (r"kill\s+-9\s+1\b", "Init process kill attempt"),
    (r"killall\s+-9\s+.*", "Mass process kill attempt"),
    // Reconnaissance
    (r"find\s+/.*-name.*\*\.key", "Key file search"),
    (r"find\s+/.*-name.*\*\.pem", "Certificate search"),
    (r"locate\s+.*password", "Password file location"),
];

pub(super) fn compile_critical() -> Result<Vec<(Regex, &'static str)>, regex::Error> {
    CRITICAL_SECURITY_PATTERNS
        .iter()
        .map(|(p, desc)| {
            RegexBuilder::new(p)
                .case_insensitive(true)
                .build()
                .map(|re| (re, *desc))
        })
        .collect()
}

fn has_wildcard(pattern: &str) -> bool {
    pattern.contains(['*', '?'])
}

/// Translate `*` and `?` into an anchored, case-insensitive regex.
fn wildcard_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut translated = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => translated.push_str(".*"),
            '?' => translated.push('.'),
            other => translated.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    RegexBuilder::new(&translated).case_insensitive(true).build()
}

/// Match `text` against a literal-or-wildcard rule pattern, anchored at the start.
///
/// Falls back to a case-insensitive substring test if the translated regex
/// cannot be built.
pub fn matches_wildcard(text: &str, pattern: &str) -> bool {
    let text = text.trim_start();
    match wildcard_regex(pattern) {
        Ok(re) => re.is_match(text),
        Err(_) => text.to_lowercase().contains(&pattern.to_lowercase()),
    }
}

/// Programs that run the rest of their arguments as a command.
const COMMAND_WRAPPERS: &[&str] = &[
    "sudo", "doas", "env", "nohup", "time", "nice", "exec", "command", "builtin", "timeout",
    "xargs", "stdbuf",
];

/// Wrapper options whose value is a separate word.
const WRAPPER_VALUE_FLAGS: &[&str] = &["-u", "-g", "-n", "-s", "-k"];

/// Split `command` at `;`, `&`, `|`, newlines, parentheses and backticks.
///
/// Separators inside single or double quotes are kept.
pub fn command_segments(command: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (idx, ch) in command.char_indices() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(ch),
            (None, ';' | '&' | '|' | '\n' | '(' | ')' | '`') => {
                segments.push(&command[start..idx]);
                start = idx + ch.len_utf8();
            }
            (None, _) => {}
        }
    }
    segments.push(&command[start..]);

    segments
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn is_assignment(word: &str) -> bool {
    match word.split_once('=') {
        Some((name, _)) => {
            !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    }
}

/// `segment` without leading `VAR=value` words and wrapper programs.
fn strip_wrappers(segment: &str) -> String {
    let words: Vec<&str> = segment.split_whitespace().collect();
    let mut i = 0;
    while i < words.len() {
        let word = words[i];
        if is_assignment(word) {
            i += 1;
            continue;
        }
        if !COMMAND_WRAPPERS.iter().any(|w| word.eq_ignore_ascii_case(w)) {
            break;
        }
        i += 1;
        while let Some(option) = words.get(i) {
            if WRAPPER_VALUE_FLAGS.contains(option) {
                i += 2;
            } else if option.starts_with('-')
                || is_assignment(option)
                || option.starts_with(|c: char| c.is_ascii_digit())
            {
                i += 1;
            } else {
                break;
            }
        }
    }
    words.get(i..).map(|rest| rest.join(" ")).unwrap_or_default()
}

/// Every simple command in `command` that a rule pattern should be tried on.
///
/// Each segment is returned as written and, when it differs, with wrappers
/// such as `sudo` or `env X=1` stripped, so `ls && sudo reboot` yields
/// `ls`, `sudo reboot` and `reboot`.
pub fn command_heads(command: &str) -> Vec<String> {
    let mut heads: Vec<String> = Vec::new();
    for segment in command_segments(command) {
        let bare = strip_wrappers(segment);
        for head in [segment.to_string(), bare] {
            if !head.is_empty() && !heads.contains(&head) {
                heads.push(head);
            }
        }
    }
    heads
}

/// Tokens of `command` that look like filesystem paths.
pub(super) fn extract_paths(command: &str) -> Vec<&str> {
    command
        .split_whitespace()
        .filter(|token| !token.starts_with('-'))
        .map(|token| token.trim_matches(|c| c == '\'' || c == '"'))
        .filter(|token| {
            token.contains('/') || token.starts_with('~') || token.starts_with('.')
        })
        .collect()
}

/// Expand `~`, anchor relative paths at `cwd` and fold `.` and `..` lexically.
pub(super) fn normalize(path: &str, cwd: &Path) -> PathBuf {
    let expanded = shellexpand::tilde(path);
    let candidate = Path::new(expanded.as_ref());
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        cwd.join(candidate)
    };

    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Whether `path` falls under the rule entry `pattern`.
///
/// Plain entries match whole path components, so `/boot` covers `/boot/grub`
/// but not `/bootstrap`.
pub(super) fn path_matches(path: &Path, pattern: &str, cwd: &Path) -> bool {
    if has_wildcard(pattern) {
        let expanded = shellexpand::tilde(pattern);
        return matches_wildcard(&path.to_string_lossy(), &expanded);
    }
    path.starts_with(normalize(pattern, cwd))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_matching() {
        assert!(matches_wildcard("terraform destroy -auto-approve", "terraform destroy*"));
        assert!(matches_wildcard("init 0", "init ?"));
        assert!(matches_wildcard("REBOOT", "reboot"));
        assert!(matches_wildcard("  reboot now", "reboot"));
        assert!(!matches_wildcard("axb", "a.b"));
        assert!(!matches_wildcard("echo reboot", "reboot"));
    }

    #[test]
    fn test_command_segments_respect_quotes() {
        assert_eq!(
            command_segments("ls -la && reboot; echo 'a;b' | wc -l"),
            vec!["ls -la", "reboot", "echo 'a;b'", "wc -l"]
        );
        assert_eq!(command_segments("echo $(halt)"), vec!["echo $", "halt"]);
        assert!(command_segments("  ").is_empty());
    }

    #[test]
    fn test_command_heads_strip_wrappers() {
        assert_eq!(command_heads("sudo reboot"), vec!["sudo reboot", "reboot"]);
        assert_eq!(
            command_heads("ls; sudo -u root env FOO=1 shutdown -h now"),
            vec!["ls", "sudo -u root env FOO=1 shutdown -h now", "shutdown -h now"]
        );
        assert_eq!(command_heads("nohup nice -n 10 halt &"), vec!["nohup nice -n 10 halt", "halt"]);
        assert_eq!(command_heads("sudo -i"), vec!["sudo -i"]);
        assert_eq!(command_heads("LANG=C git status"), vec!["LANG=C git status", "git status"]);
    }

    #[test]
    fn test_extract_paths() {
        assert_eq!(
            extract_paths("cp -r ./src '/tmp/out' notes.txt ~/bin .."),
            vec!["./src", "/tmp/out", "~/bin", ".."]
        );
    }

    #[test]
    fn test_normalize_folds_dots() {
        let cwd = Path::new("/home/alice/project");
        assert_eq!(normalize("../../../etc/shadow", cwd), PathBuf::from("/etc/shadow"));
        assert_eq!(normalize("./a/./b", cwd), PathBuf::from("/home/alice/project/a/b"));
    }

    #[test]
    fn test_path_matches_components() {
        let cwd = Path::new("/");
        assert!(path_matches(Path::new("/boot/grub"), "/boot", cwd));
        assert!(!path_matches(Path::new("/bootstrap"), "/boot", cwd));
        assert!(path_matches(Path::new("/dev/sda1"), "/dev/sd*", cwd));
        assert!(!path_matches(Path::new("/dev/null"), "/dev/sd*", cwd));
    }
}
