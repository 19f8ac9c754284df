//! [`DiffSource`] backed by the `git` command line.
//!
//! Chunks come from `git diff -U0`, whose hunk headers carry exactly the
//! old/new offsets and counts the propagator needs.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

use super::{validate_repo_relative_path, validate_rev, DiffChunk, DiffSource};

/// Object name of the empty tree, used as the "parent" of a root commit.
pub const EMPTY_TREE: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

/// Field separator for `git log` formats.
const FIELD_SEP: char = '\u{1f}';

#[derive(Debug, Clone)]
pub struct GitRepo {
    root: PathBuf,
}

/// A commit as reported by `git log`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitCommit {
    pub sha: String,
    pub parents: Vec<String>,
    pub author_name: String,
    pub author_email: String,
    pub summary: String,
}

/// Per-file line counts from `git diff --numstat`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedFile {
    pub path: String,
    pub deleted: u32,
    pub inserted: u32,
}

impl GitRepo {
    #[must_use]
    pub const fn new(root: PathBuf) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn run_git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .current_dir(&self.root)
            .args(args)
            .output()
            .with_context(|| {
                if let Err(e) = which::which("git") {
                    format!("git command not found. Please install git: {e}")
                } else {
                    format!("Failed to execute git command: {args:?}")
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "git command failed with status {}: {}",
                output.status,
                stderr.trim()
            );
        }

        String::from_utf8(output.stdout).context("git output was not valid UTF-8")
    }

    /// Resolve a revision to a full commit sha.
    pub fn resolve(&self, rev: &str) -> Result<String> {
        validate_rev(rev)?;
        let spec = format!("{rev}^{{commit}}");
        let output = self
            .run_git(&["rev-parse", "--verify", "--end-of-options", &spec])
            .with_context(|| format!("Failed to resolve commit for {rev}"))?;
        Ok(output.trim().to_string())
    }

    /// Commits reachable from `head` but not from `base`, oldest first.
    pub fn commits_between(&self, base: &str, head: &str) -> Result<Vec<GitCommit>> {
        validate_rev(base)?;
        validate_rev(head)?;
        let range = format!("{base}..{head}");
        let format = format!("--format=%H %P{FIELD_SEP}%an{FIELD_SEP}%ae{FIELD_SEP}%s");
        let output = self
            .run_git(&["log", "--reverse", "--topo-order", &format, &range])
            .with_context(|| format!("Failed to list commits in {range}"))?;

        output
            .lines()
            .filter(|line| !line.is_empty())
            .map(parse_log_line)
            .collect()
    }

    /// Files changed between two commits with their line counts.
    ///
    /// `from = None` diffs against the empty tree.
    pub fn changed_files(&self, from: Option<&str>, to: &str) -> Result<Vec<ChangedFile>> {
        let from = from.unwrap_or(EMPTY_TREE);
        validate_rev(from)?;
        validate_rev(to)?;
        let output = self
            .run_git(&["diff", "--no-color", "--numstat", "--no-renames", from, to])
            .with_context(|| format!("Failed to list changed files from {from} to {to}"))?;

        output
            .lines()
            .filter(|line| !line.is_empty())
            .map(parse_numstat_line)
            .collect()
    }
}

#[must_use]
pub fn detect_git_root(start_path: &Path) -> Option<PathBuf> {
    let output = Command::new("git")
        .current_dir(start_path)
        .args(["rev-parse", "--show-toplevel"])
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let stdout = String::from_utf8(output.stdout).ok()?;
    let root = stdout.trim();
    if root.is_empty() {
        None
    } else {
        Some(PathBuf::from(root))
    }
}

impl DiffSource for GitRepo {
    fn chunks(&self, from: &str, to: &str, path: &str) -> Result<Vec<DiffChunk>> {
        validate_rev(from)?;
        validate_rev(to)?;
        validate_repo_relative_path(path)?;
        let diff = self
            .run_git(&["diff", "--no-color", "-U0", from, to, "--", path])
            .with_context(|| format!("Failed to diff {path} from {from} to {to}"))?;

        diff.lines()
            .filter(|line| line.starts_with("@@"))
            .map(parse_hunk_header)
            .collect()
    }

    fn file_exists(&self, commit: &str, path: &str) -> Result<bool> {
        validate_rev(commit)?;
        validate_repo_relative_path(path)?;
        let spec = format!("{commit}:{path}");

        let output = Command::new("git")
            .current_dir(&self.root)
            .args(["cat-file", "-e", "--end-of-options", &spec])
            .output()
            .context("Failed to execute git cat-file")?;

        Ok(output.status.success())
    }

    fn content_hash(&self, commit: &str, path: &str) -> Result<Option<String>> {
        if !self.file_exists(commit, path)? {
            return Ok(None);
        }
        let spec = format!("{commit}:{path}");
        let output = self
            .run_git(&["rev-parse", "--verify", "--end-of-options", &spec])
            .with_context(|| format!("Failed to hash {path} at {commit}"))?;
        Ok(Some(output.trim().to_string()))
    }
}

/// Parse a `-U0` hunk header such as `@@ -10,2 +9,0 @@ fn main() {`.
///
/// Git reports a zero-count side by the line *after which* the change sits;
/// that is normalized to the line before which it sits.
pub fn parse_hunk_header(line: &str) -> Result<DiffChunk> {
    let line = line.trim();
    let Some(rest) = line.strip_prefix("@@") else {
        bail!("Not a hunk header: {line}");
    };
    let range_part = rest.find("@@").map_or(rest, |idx| &rest[..idx]);

    let parts: Vec<&str> = range_part.split_whitespace().collect();
    if parts.len() < 2 {
        bail!("Invalid hunk header format: {line}");
    }

    let (old_start, old_count) = parse_range(parts[0], '-')?;
    let (new_start, new_count) = parse_range(parts[1], '+')?;

    Ok(DiffChunk {
        delete_offset: if old_count == 0 { old_start + 1 } else { old_start },
        delete_count: old_count,
        insert_offset: if new_count == 0 { new_start + 1 } else { new_start },
        insert_count: new_count,
    })
}

/// Parse a range like `-1,5` or `+1` into (start, count).
fn parse_range(s: &str, prefix: char) -> Result<(u32, u32)> {
    let Some(s) = s.strip_prefix(prefix) else {
        bail!("Range {s} does not start with '{prefix}'");
    };

    if let Some((start_str, count_str)) = s.split_once(',') {
        Ok((start_str.parse()?, count_str.parse()?))
    } else {
        // No comma means count is 1
        Ok((s.parse()?, 1))
    }
}

fn parse_log_line(line: &str) -> Result<GitCommit> {
    let mut fields = line.splitn(4, FIELD_SEP);
    let (Some(ids), Some(name), Some(email), Some(summary)) =
        (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        bail!("Malformed git log line: {line}");
    };

    let mut ids = ids.split_whitespace().map(ToString::to_string);
    let Some(sha) = ids.next() else {
        bail!("Missing commit sha in git log line: {line}");
    };

    Ok(GitCommit {
        sha,
        parents: ids.collect(),
        author_name: name.to_string(),
        author_email: email.to_string(),
        summary: summary.to_string(),
    })
}

fn parse_numstat_line(line: &str) -> Result<ChangedFile> {
    let mut fields = line.splitn(3, '\t');
    let (Some(added), Some(removed), Some(path)) = (fields.next(), fields.next(), fields.next())
    else {
        bail!("Malformed numstat line: {line}");
    };

    // Binary files report "-" for both counts.
    let inserted = added.parse().unwrap_or(0);
    let deleted = removed.parse().unwrap_or(0);

    Ok(ChangedFile {
        path: path.to_string(),
        deleted,
        inserted,
    })
}
