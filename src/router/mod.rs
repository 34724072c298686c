//! Shell-or-model routing for a line of input.
//!
//! A line goes to the shell when it contains shell syntax, or when its first
//! word is a known builtin or executable. Everything else goes to the model.
//! `cd`, `pwd` and `exit` are intercepted before either.

use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

const SHELL_SYNTAX_PATTERNS: &[&str] = &[
    r"\|",                       // pipes
    r">|>>",                     // redirects
    r"&$",                       // backgrounding
    r"\$\(",                     // command substitution
    r"`[^`]+`",                  // backtick substitution
    r"\$\{[^}]+\}",              // parameter expansion
    r"\$[A-Za-z_][A-Za-z0-9_]*", // variable references
    r"[*?\[\]]",                 // globs
    r"[A-Za-z_][A-Za-z0-9_]*=",  // assignments
    r"\(",                       // subshells
    r"&&|\|\|",                  // logical operators
    r";",                        // separators
    r"~",                        // tilde expansion
];

/// Words that wrap another command; routing looks at the word after them.
const COMMAND_PREFIXES: &[&str] = &["sudo", "env", "time", "timeout", "nice", "nohup"];

const FALLBACK_BUILTINS: &[&str] = &[
    "cd", "pwd", "echo", "printf", "read", "test", "[", "export", "unset", "set", "shift",
    "source", ".", "eval", "exec", "exit", "return", "break", "continue", "if", "then", "else",
    "elif", "fi", "case", "esac", "while", "until", "for", "do", "done", "function", "time",
    "coproc", "select", "alias", "unalias", "history", "fc", "jobs", "bg", "fg", "disown",
    "suspend", "kill", "wait", "trap", "type", "which", "command", "builtin", "enable", "help",
    "let", "local", "readonly", "declare", "typeset", "getopts", "hash", "dirs", "pushd",
    "popd", "shopt", "complete", "compgen", "bind", "caller", "ulimit",
];

const FALLBACK_COMMANDS: &[&str] = &[
    "ls", "cd", "pwd", "mkdir", "rmdir", "rm", "cp", "mv", "ln", "touch", "chmod", "chown",
    "chgrp", "find", "grep", "sed", "awk", "sort", "uniq", "cut", "tr", "head", "tail", "cat",
    "less", "more", "vim", "nano", "emacs", "git", "curl", "wget", "tar", "gzip", "gunzip",
    "zip", "unzip", "ps", "top", "htop", "kill", "killall", "pkill", "pgrep", "man", "which",
    "whereis", "locate", "file", "stat", "du", "df", "mount", "umount", "lsof", "netstat", "ss",
    "ping", "traceroute", "nslookup", "dig", "ssh", "scp", "rsync", "make", "gcc", "g++",
    "clang", "gdb", "python", "python3", "pip", "pip3", "node", "npm", "yarn", "docker",
    "kubectl", "helm", "cargo", "rustc",
];

const MAX_PROBED_COMMANDS: usize = 1000;
const MAX_COMMAND_NAME_LEN: usize = 50;

/// Commands the session implements itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Builtin {
    Cd,
    Pwd,
    Exit,
}

impl Builtin {
    pub fn parse(word: &str) -> Option<Self> {
        match word {
            "cd" => Some(Self::Cd),
            "pwd" => Some(Self::Pwd),
            "exit" => Some(Self::Exit),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Cd => "cd",
            Self::Pwd => "pwd",
            Self::Exit => "exit",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Builtin(Builtin),
    Shell,
    Model,
}

impl Route {
    /// Value recorded in outcome metadata under `routing`.
    pub fn label(self) -> &'static str {
        match self {
            Self::Builtin(_) => "builtin",
            Self::Shell => "shell",
            Self::Model => "model",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandRouter {
    syntax: Vec<Regex>,
    known: HashSet<String>,
    search_path: Vec<PathBuf>,
}

impl CommandRouter {
    /// Router over a fixed command table, without `PATH` lookups.
    pub fn with_known_commands<I, S>(commands: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let syntax = SHELL_SYNTAX_PATTERNS
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            syntax,
            known: commands.into_iter().map(Into::into).collect(),
            search_path: Vec::new(),
        })
    }

    /// Router over the fallback tables only.
    pub fn with_fallback_commands() -> Result<Self, regex::Error> {
        Self::with_known_commands(
            FALLBACK_BUILTINS
                .iter()
                .chain(FALLBACK_COMMANDS)
                .map(|s| s.to_string()),
        )
    }

    /// Ask bash for its builtins and the executables on `PATH`.
    ///
    /// Each probe is bounded by `probe_timeout`; a probe that fails or times
    /// out is replaced by the built-in fallback list.
    pub async fn probe(probe_timeout: Duration) -> Result<Self, regex::Error> {
        let mut known: HashSet<String> = HashSet::new();

        match compgen("-b", probe_timeout).await {
            Some(builtins) => known.extend(builtins),
            None => {
                warn!("Could not list shell builtins, using fallback list");
                known.extend(FALLBACK_BUILTINS.iter().map(|s| s.to_string()));
            }
        }

        match compgen("-c", probe_timeout).await {
            Some(commands) => known.extend(
                commands
                    .into_iter()
                    .filter(|c| c.len() < MAX_COMMAND_NAME_LEN)
                    .take(MAX_PROBED_COMMANDS),
            ),
            None => {
                warn!("Could not list executables, using fallback list");
                known.extend(FALLBACK_COMMANDS.iter().map(|s| s.to_string()));
            }
        }
        debug!("Command router knows {} commands", known.len());

        let mut router = Self::with_known_commands(known)?;
        router.search_path = env::var_os("PATH")
            .map(|p| env::split_paths(&p).collect())
            .unwrap_or_default();
        Ok(router)
    }

    pub fn with_search_path(mut self, dirs: Vec<PathBuf>) -> Self {
        self.search_path = dirs;
        self
    }

    pub fn route(&self, line: &str) -> Route {
        let line = line.trim();
        if line.is_empty() {
            return Route::Model;
        }
        if let Some(builtin) = Self::builtin(line) {
            return Route::Builtin(builtin);
        }
        if self.has_shell_syntax(line) {
            return Route::Shell;
        }

        let mut words = line.split_whitespace();
        let mut first = words.next().unwrap_or_default();
        if COMMAND_PREFIXES.contains(&first) {
            if let Some(next) = words.next() {
                first = next;
            }
        }

        if self.is_known_command(first) {
            Route::Shell
        } else {
            Route::Model
        }
    }

    pub fn builtin(line: &str) -> Option<Builtin> {
        line.split_whitespace().next().and_then(Builtin::parse)
    }

    pub fn has_shell_syntax(&self, line: &str) -> bool {
        self.syntax.iter().any(|re| re.is_match(line))
    }

    pub fn is_known_command(&self, word: &str) -> bool {
        self.known.contains(word)
            || self
                .search_path
                .iter()
                .any(|dir| is_executable(&dir.join(word)))
    }
}

async fn compgen(flag: &str, probe_timeout: Duration) -> Option<Vec<String>> {
    let mut cmd = Command::new("bash");
    cmd.arg("-c").arg(format!("compgen {}", flag));
    cmd.kill_on_drop(true);
    cmd.stdin(Stdio::null());

    let output = timeout(probe_timeout, cmd.output()).await.ok()?.ok()?;
    if !output.status.success() {
        return None;
    }
    let names: Vec<String> = String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect();
    if names.is_empty() { None } else { Some(names) }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> CommandRouter {
        CommandRouter::with_known_commands(["ls", "git", "grep", "echo"]).unwrap()
    }

    #[test]
    fn test_shell_syntax_routes_to_shell() {
        let r = router();
        for line in [
            "ls -la | grep test",
            "make > build.log",
            "sleep 10 &",
            "echo $(date)",
            "echo `whoami`",
            "echo ${HOME}",
            "foo $HOME",
            "rm *.tmp",
            "FOO=bar",
            "(cd x)",
            "a && b",
            "a; b",
            "open ~/notes",
        ] {
            assert_eq!(r.route(line), Route::Shell, "{}", line);
        }
    }

    #[test]
    fn test_natural_language_routes_to_model() {
        let r = router();
        assert_eq!(r.route("explain this error"), Route::Model);
        assert_eq!(r.route("summarize the last commit"), Route::Model);
        assert_eq!(r.route(""), Route::Model);
        assert_eq!(r.route("   "), Route::Model);
    }

    #[test]
    fn test_known_command_routes_to_shell() {
        let r = router();
        assert_eq!(r.route("git status"), Route::Shell);
        assert_eq!(r.route("sudo ls"), Route::Shell);
        assert_eq!(r.route("nohup grep foo bar.txt"), Route::Shell);
        assert_eq!(r.route("sudo"), Route::Model);
    }

    #[test]
    fn test_builtins_intercepted_first() {
        let r = router();
        assert_eq!(r.route("cd /tmp"), Route::Builtin(Builtin::Cd));
        assert_eq!(r.route("pwd"), Route::Builtin(Builtin::Pwd));
        assert_eq!(r.route("  exit  "), Route::Builtin(Builtin::Exit));
        assert_eq!(r.route("cd ~/src && ls"), Route::Builtin(Builtin::Cd));
    }

    #[test]
    fn test_search_path_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("mytool");
        std::fs::write(&tool, "#!/bin/sh\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let r = router().with_search_path(vec![dir.path().to_path_buf()]);
        assert_eq!(r.route("mytool --help"), Route::Shell);
        assert_eq!(r.route("othertool --help"), Route::Model);
    }

    #[tokio::test]
    async fn test_probe_knows_common_commands() {
        let r = CommandRouter::probe(Duration::from_secs(5)).await.unwrap();
        assert_eq!(r.route("ls -la"), Route::Shell);
        assert_eq!(r.route("explain this error"), Route::Model);
    }
}
