//! Review filters: which users review, watch or ignore which paths.
//!
//! Patterns use gitignore syntax relative to the repository root. An empty
//! pattern or `/` matches every path. When several of a user's filters match a
//! path, the most specific pattern decides.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};
use ignore::gitignore::{Gitignore, GitignoreBuilder};

use crate::model::{FilterKind, ReviewFilter, UserId};

/// A compiled filter path pattern.
#[derive(Debug, Clone)]
pub struct FilterPattern {
    source: String,
    /// `None` matches everything.
    matcher: Option<Gitignore>,
}

impl FilterPattern {
    pub fn compile(pattern: &str) -> Result<Self> {
        let trimmed = pattern.trim();
        if is_match_all(trimmed) {
            return Ok(Self {
                source: trimmed.to_string(),
                matcher: None,
            });
        }
        if trimmed.starts_with('!') {
            anyhow::bail!("Negated filter patterns are not supported: {trimmed}");
        }

        let mut builder = GitignoreBuilder::new(Path::new(""));
        builder
            .add_line(None, trimmed)
            .with_context(|| format!("Invalid filter pattern: {trimmed}"))?;
        let matcher = builder
            .build()
            .with_context(|| format!("Invalid filter pattern: {trimmed}"))?;

        Ok(Self {
            source: trimmed.to_string(),
            matcher: Some(matcher),
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether `path` (repository-relative) is covered by this pattern.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        self.matcher.as_ref().map_or(true, |matcher| {
            // Directory patterns like "src/" must also cover "src/lib.rs".
            matcher
                .matched_path_or_any_parents(path.trim_start_matches('/'), false)
                .is_ignore()
        })
    }

    /// Ranking used to pick between several matching patterns.
    ///
    /// More path segments win; at equal depth a pattern without wildcards
    /// beats one with them. Match-all patterns rank lowest.
    #[must_use]
    pub fn specificity(&self) -> (usize, bool) {
        if self.matcher.is_none() {
            return (0, false);
        }
        let segments = self
            .source
            .split('/')
            .filter(|segment| !segment.is_empty())
            .count();
        let literal = !self.source.contains(['*', '?', '[']);
        (segments, literal)
    }
}

fn is_match_all(pattern: &str) -> bool {
    pattern.is_empty() || pattern == "/"
}

/// Normalize a user-supplied pattern the way it is stored.
///
/// Trailing slashes are dropped, so `src` and `src/` are the same filter.
/// Review files are always files, and a file path matches either form
/// through its parent directories.
#[must_use]
pub fn normalize_pattern(pattern: &str) -> String {
    let trimmed = pattern.trim();
    if is_match_all(trimmed) {
        String::new()
    } else {
        trimmed.trim_end_matches('/').to_string()
    }
}

#[derive(Debug, Clone)]
struct CompiledFilter {
    filter: ReviewFilter,
    pattern: FilterPattern,
}

/// All filters of one review, compiled for matching.
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    filters: Vec<CompiledFilter>,
}

impl FilterSet {
    pub fn new(filters: impl IntoIterator<Item = ReviewFilter>) -> Result<Self> {
        let filters = filters
            .into_iter()
            .map(|filter| {
                let pattern = FilterPattern::compile(&filter.path)?;
                Ok(CompiledFilter { filter, pattern })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { filters })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReviewFilter> {
        self.filters.iter().map(|compiled| &compiled.filter)
    }

    /// Users with at least one filter.
    #[must_use]
    pub fn users(&self) -> BTreeSet<UserId> {
        self.filters.iter().map(|c| c.filter.user).collect()
    }

    /// The filter deciding `user`'s relation to `path`, if any matches.
    ///
    /// Ties in specificity go to the stronger kind (`ignored` over `watcher`
    /// over `reviewer`), then to the newer filter.
    #[must_use]
    pub fn decisive(&self, user: UserId, path: &str) -> Option<&ReviewFilter> {
        self.filters
            .iter()
            .filter(|c| c.filter.user == user && c.pattern.matches(path))
            .max_by_key(|c| (c.pattern.specificity(), c.filter.kind, c.filter.id))
            .map(|c| &c.filter)
    }

    #[must_use]
    pub fn kind_for(&self, user: UserId, path: &str) -> Option<FilterKind> {
        self.decisive(user, path).map(|filter| filter.kind)
    }

    #[must_use]
    pub fn is_reviewer(&self, user: UserId, path: &str) -> bool {
        self.kind_for(user, path) == Some(FilterKind::Reviewer)
    }

    #[must_use]
    pub fn is_watcher(&self, user: UserId, path: &str) -> bool {
        self.kind_for(user, path) == Some(FilterKind::Watcher)
    }

    /// Reviewers of `path`.
    #[must_use]
    pub fn reviewers_of(&self, path: &str) -> BTreeSet<UserId> {
        self.users()
            .into_iter()
            .filter(|user| self.is_reviewer(*user, path))
            .collect()
    }

    pub(crate) fn push(&mut self, filter: ReviewFilter) -> Result<()> {
        let pattern = FilterPattern::compile(&filter.path)?;
        self.filters.push(CompiledFilter { filter, pattern });
        Ok(())
    }

    pub(crate) fn remove(&mut self, filter: &ReviewFilter) {
        self.filters.retain(|c| c.filter.id != filter.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FilterId, ReviewId};

    fn filter(id: i64, user: i64, path: &str, kind: FilterKind) -> ReviewFilter {
        ReviewFilter {
            id: FilterId(id),
            review: ReviewId(1),
            user: UserId(user),
            path: path.to_string(),
            kind,
            creator: UserId(user),
        }
    }

    #[test]
    fn test_match_all_patterns() {
        for pattern in ["", "/", "  "] {
            let compiled = FilterPattern::compile(pattern).unwrap();
            assert!(compiled.matches("src/main.rs"));
            assert!(compiled.matches("README.md"));
            assert_eq!(compiled.specificity(), (0, false));
        }
        assert_eq!(normalize_pattern("/"), "");
    }

    #[test]
    fn test_trailing_slash_is_normalized_away() {
        assert_eq!(normalize_pattern("src/"), "src");
        assert_eq!(normalize_pattern(" src// "), "src");
        assert_eq!(normalize_pattern("/src/"), "/src");
        assert_eq!(normalize_pattern("src/lib.rs"), "src/lib.rs");

        let canonical = FilterPattern::compile(&normalize_pattern("src/")).unwrap();
        assert!(canonical.matches("src/lib.rs"));
        assert!(canonical.matches("src/deep/nested/mod.rs"));
        assert!(!canonical.matches("docs/src.md"));
    }

    #[test]
    fn test_directory_pattern_covers_children() {
        let pattern = FilterPattern::compile("src/").unwrap();
        assert!(pattern.matches("src/lib.rs"));
        assert!(pattern.matches("src/deep/nested/mod.rs"));
        assert!(!pattern.matches("docs/src.md"));
    }

    #[test]
    fn test_glob_pattern() {
        let pattern = FilterPattern::compile("*.md").unwrap();
        assert!(pattern.matches("README.md"));
        assert!(pattern.matches("docs/guide.md"));
        assert!(!pattern.matches("src/lib.rs"));
    }

    #[test]
    fn test_negation_rejected() {
        assert!(FilterPattern::compile("!src/").is_err());
    }

    #[test]
    fn test_most_specific_filter_wins() {
        let set = FilterSet::new([
            filter(1, 1, "", FilterKind::Reviewer),
            filter(2, 1, "vendor/", FilterKind::Ignored),
            filter(3, 1, "vendor/keep/", FilterKind::Reviewer),
        ])
        .unwrap();

        assert!(set.is_reviewer(UserId(1), "src/lib.rs"));
        assert!(!set.is_reviewer(UserId(1), "vendor/lib.rs"));
        assert_eq!(set.kind_for(UserId(1), "vendor/lib.rs"), Some(FilterKind::Ignored));
        assert!(set.is_reviewer(UserId(1), "vendor/keep/a.rs"));
        assert_eq!(set.kind_for(UserId(2), "src/lib.rs"), None);
    }

    #[test]
    fn test_literal_beats_wildcard_at_equal_depth() {
        let set = FilterSet::new([
            filter(1, 1, "src/*.rs", FilterKind::Watcher),
            filter(2, 1, "src/lib.rs", FilterKind::Reviewer),
        ])
        .unwrap();
        assert!(set.is_reviewer(UserId(1), "src/lib.rs"));
        assert!(set.is_watcher(UserId(1), "src/main.rs"));
    }

    #[test]
    fn test_reviewers_of_and_edits() {
        let mut set = FilterSet::new([
            filter(1, 1, "src/", FilterKind::Reviewer),
            filter(2, 2, "", FilterKind::Reviewer),
            filter(3, 3, "", FilterKind::Watcher),
        ])
        .unwrap();
        let reviewers: Vec<_> = set.reviewers_of("src/lib.rs").into_iter().collect();
        assert_eq!(reviewers, vec![UserId(1), UserId(2)]);

        let ignored = filter(4, 2, "src/", FilterKind::Ignored);
        set.push(ignored.clone()).unwrap();
        assert_eq!(set.reviewers_of("src/lib.rs").len(), 1);

        set.remove(&ignored);
        assert_eq!(set.reviewers_of("src/lib.rs").len(), 2);
        assert_eq!(set.len(), 3);
    }
}
