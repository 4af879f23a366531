//! Local shell backend.
//!
//! - [`pty`] — PTY allocation, spawn, resize
//! - [`local`] — [`local::LocalShell`], the [`crate::backend::ShellBackend`]
//!   implementation for shells on this host

use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub mod local;
pub mod pty;

/// Shells found on this system, most preferred first.
///
/// Reads `/etc/shells` (skipping comments and missing paths), falling back to
/// a fixed candidate list. Symlinked duplicates such as `/bin/bash` and
/// `/usr/bin/bash` are collapsed.
pub fn detect_shells() -> Vec<String> {
    let from_file: Vec<String> = std::fs::read_to_string("/etc/shells")
        .map(|contents| {
            contents
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .filter(|l| Path::new(l).exists())
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default();
    let candidates = if from_file.is_empty() {
        ["/bin/bash", "/bin/zsh", "/bin/ash", "/bin/dash", "/bin/sh"]
            .iter()
            .filter(|p| Path::new(p).exists())
            .map(|p| (*p).to_string())
            .collect()
    } else {
        from_file
    };

    let mut seen = HashSet::new();
    let mut shells: Vec<String> = candidates
        .into_iter()
        .filter(|p| seen.insert(std::fs::canonicalize(p).unwrap_or_else(|_| PathBuf::from(p))))
        .collect();
    shells.sort_by_key(|s| shell_rank(s));
    shells
}

fn shell_rank(path: &str) -> u8 {
    match path.rsplit('/').next().unwrap_or(path) {
        "bash" => 0,
        "zsh" => 1,
        "ash" => 2,
        "dash" => 3,
        "sh" => 4,
        _ => 5,
    }
}

/// The shell to launch: `requested` if it exists, else the best detected one.
pub fn resolve_shell(requested: &str) -> Option<String> {
    if Path::new(requested).exists() {
        return Some(requested.to_string());
    }
    detect_shells().into_iter().next()
}
