//! Layered ignore rules.
//!
//! Four tiers are consulted in a fixed order and the first tier with a
//! matching rule decides:
//!
//! 1. `Explicit` include/exclude globs supplied by the caller,
//! 2. `BuiltIn` defaults such as VCS metadata,
//! 3. `Custom` user-defined rules (`.ctxignore` or configured patterns),
//! 4. `Gitignore` rules discovered under the root, each scoped to the
//!    directory containing its file.
//!
//! The engine is built and loaded once per scan root and is read-only while
//! the scanner's workers query it.

use std::cmp::Reverse;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use ignore::Match;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use super::error::{CoreError, Warning};
use crate::config::ScanConfig;

/// Entries excluded unless built-ins are switched off.
pub const BUILTIN_IGNORES: &[&str] = &[
    ".git",
    ".svn",
    ".hg",
    ".bzr",
    "_darcs",
    "CVS",
    ".DS_Store",
    "Thumbs.db",
    "desktop.ini",
];

/// Name of the per-directory ignore files that are discovered.
pub const GITIGNORE_FILE: &str = ".gitignore";

/// Name of the user-defined ignore file read from the scan root.
pub const CUSTOM_IGNORE_FILE: &str = ".ctxignore";

/// Precedence tier of a rule, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IgnoreTier {
    Explicit,
    BuiltIn,
    Custom,
    Gitignore,
}

/// Result of [`IgnoreEngine::should_ignore`]. `tier` is the tier whose rule
/// decided, or `None` when no rule matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub ignored: bool,
    pub tier: Option<IgnoreTier>,
}

impl Verdict {
    const UNMATCHED: Verdict = Verdict {
        ignored: false,
        tier: None,
    };

    fn decided(tier: IgnoreTier, ignored: bool) -> Self {
        Self {
            ignored,
            tier: Some(tier),
        }
    }

    /// Excluded by a tier that is never walked or tagged.
    pub fn is_pruned(&self) -> bool {
        self.ignored && matches!(self.tier, Some(IgnoreTier::Explicit | IgnoreTier::BuiltIn))
    }
}

struct ScopedGitignore {
    /// Directory of the ignore file, relative to the root.
    dir: PathBuf,
    matcher: Gitignore,
}

pub struct IgnoreEngine {
    root: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
    builtin: Gitignore,
    custom_builder: GitignoreBuilder,
    custom: Gitignore,
    /// Sorted deepest directory first.
    gitignores: Vec<ScopedGitignore>,
    warnings: Vec<Warning>,
}

impl IgnoreEngine {
    /// Creates an engine for `root` with the built-in rules and nothing else.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let mut warnings = Vec::new();

        let mut builder = GitignoreBuilder::new(&root);
        for pattern in BUILTIN_IGNORES {
            if let Err(e) = builder.add_line(None, pattern) {
                warnings.push(Warning::new(*pattern, e));
            }
        }
        let builtin = build_matcher(&builder, &root, &mut warnings);

        Self {
            custom_builder: GitignoreBuilder::new(&root),
            root,
            include: GlobSet::empty(),
            exclude: GlobSet::empty(),
            builtin,
            custom: Gitignore::empty(),
            gitignores: Vec::new(),
            warnings,
        }
    }

    /// Builds and loads an engine the way a scan configured by `config` needs it.
    pub fn from_config(
        root: &Path,
        config: &ScanConfig,
        cancel: &CancellationToken,
    ) -> Result<Self, CoreError> {
        let mut engine = Self::new(root).with_explicit(&config.include, &config.exclude);
        if !config.use_builtin_ignores {
            engine = engine.without_builtins();
        }

        engine.load_custom_file(&root.join(CUSTOM_IGNORE_FILE));
        if let Some(file) = &config.custom_ignore_file {
            engine.load_custom_file(&root.join(file));
        }
        engine.load_custom_rules(&config.custom_patterns);

        if config.respect_gitignore {
            engine.load_gitignore_tree_with_cancel(cancel)?;
        }
        Ok(engine)
    }

    /// Sets the explicit include and exclude globs. A pattern without a `/`
    /// matches at any depth; every pattern also covers the matched path's
    /// descendants.
    pub fn with_explicit<S: AsRef<str>>(mut self, include: &[S], exclude: &[S]) -> Self {
        self.include = build_globset(include, &mut self.warnings);
        self.exclude = build_globset(exclude, &mut self.warnings);
        self
    }

    pub fn without_builtins(mut self) -> Self {
        self.builtin = Gitignore::empty();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn has_explicit_includes(&self) -> bool {
        !self.include.is_empty()
    }

    /// Patterns that could not be loaded, and ignore files that could not be read.
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Adds user-defined rules in `.gitignore` syntax, rooted at the scan root.
    pub fn load_custom_rules<S: AsRef<str>>(&mut self, patterns: &[S]) {
        if patterns.is_empty() {
            return;
        }
        for pattern in patterns {
            add_line(&mut self.custom_builder, None, pattern.as_ref(), 0, &mut self.warnings);
        }
        self.custom = build_matcher(&self.custom_builder, &self.root, &mut self.warnings);
    }

    /// Adds the rules of a user-defined ignore file. A missing file is skipped
    /// silently; an unreadable one is logged and recorded as a warning.
    pub fn load_custom_file(&mut self, path: &Path) {
        let Some(content) = read_rules_file(path, &mut self.warnings) else {
            return;
        };
        for (idx, line) in content.lines().enumerate() {
            add_line(
                &mut self.custom_builder,
                Some(path),
                line,
                idx + 1,
                &mut self.warnings,
            );
        }
        self.custom = build_matcher(&self.custom_builder, &self.root, &mut self.warnings);
        tracing::debug!("Loaded custom ignore rules from {}", path.display());
    }

    /// Adds `.gitignore` content for the directory `dir` (relative to the root).
    /// The rules apply to `dir` and its descendants only.
    pub fn add_gitignore(&mut self, dir: impl Into<PathBuf>, source: &Path, content: &str) {
        let dir = dir.into();
        let mut builder = GitignoreBuilder::new(self.root.join(&dir));
        for (idx, line) in content.lines().enumerate() {
            add_line(&mut builder, Some(source), line, idx + 1, &mut self.warnings);
        }
        let matcher = build_matcher(&builder, source, &mut self.warnings);
        if matcher.is_empty() {
            return;
        }
        self.gitignores.push(ScopedGitignore { dir, matcher });
        self.gitignores
            .sort_by_key(|scoped| Reverse(scoped.dir.components().count()));
    }

    /// Discovers every `.gitignore` below the root and loads it scoped to its
    /// directory.
    pub fn load_gitignore_tree(&mut self) -> Result<usize, CoreError> {
        self.load_gitignore_tree_with_cancel(&CancellationToken::new())
    }

    /// Walks the root top-down and loads each directory's `.gitignore` before
    /// its subdirectories are visited. Directories pruned by the explicit or
    /// built-in tiers, or excluded by an ignore file above them, are not
    /// searched. Unreadable ignore files are skipped; only a failure to read
    /// the root itself is returned as an error.
    pub fn load_gitignore_tree_with_cancel(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<usize, CoreError> {
        if !self.root.is_dir() {
            return Err(CoreError::NotADirectory(self.root.clone()));
        }

        let root = self.root.clone();
        let mut loaded = 0;
        let mut walker = WalkDir::new(&root).follow_links(false).into_iter();
        while let Some(entry) = walker.next() {
            if cancel.is_cancelled() {
                tracing::info!("Loading ignore files under {} cancelled", root.display());
                return Err(CoreError::Cancelled);
            }
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => {
                    let message = e.to_string();
                    let io = e
                        .into_io_error()
                        .unwrap_or_else(|| std::io::Error::other(message));
                    return Err(CoreError::Io(io, root));
                }
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_default();
                    tracing::warn!("Skipping unreadable entry while loading ignore files: {}", e);
                    self.warnings.push(Warning::new(path, e));
                    continue;
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }

            let rel = entry
                .path()
                .strip_prefix(&root)
                .unwrap_or(entry.path())
                .to_path_buf();
            if entry.depth() > 0
                && (self.should_ignore(&rel, true).is_pruned() || self.is_gitignored(&rel, true))
            {
                walker.skip_current_dir();
                continue;
            }

            let source = entry.path().join(GITIGNORE_FILE);
            if !source.is_file() {
                continue;
            }
            if let Some(content) = read_rules_file(&source, &mut self.warnings) {
                self.add_gitignore(rel, &source, &content);
                loaded += 1;
            }
        }

        tracing::info!("Loaded {} ignore file(s) under {}", loaded, root.display());
        Ok(loaded)
    }

    /// Decides whether `rel` (relative to the root) is excluded.
    pub fn should_ignore(&self, rel: &Path, is_dir: bool) -> Verdict {
        if rel.as_os_str().is_empty() {
            return Verdict::UNMATCHED;
        }
        if self.include.is_match(rel) {
            return Verdict::decided(IgnoreTier::Explicit, false);
        }
        if self.exclude.is_match(rel) {
            return Verdict::decided(IgnoreTier::Explicit, true);
        }
        if let Some(ignored) = decide(self.builtin.matched_path_or_any_parents(rel, is_dir)) {
            return Verdict::decided(IgnoreTier::BuiltIn, ignored);
        }
        if let Some(ignored) = self.custom_match(rel, is_dir) {
            return Verdict::decided(IgnoreTier::Custom, ignored);
        }
        if let Some(ignored) = self.gitignore_match(rel, is_dir) {
            return Verdict::decided(IgnoreTier::Gitignore, ignored);
        }
        Verdict::UNMATCHED
    }

    /// Whether the gitignore tier alone would exclude `rel`, whatever the
    /// higher tiers decide.
    pub fn is_gitignored(&self, rel: &Path, is_dir: bool) -> bool {
        self.gitignore_match(rel, is_dir) == Some(true)
    }

    /// Whether the custom tier alone would exclude `rel`.
    pub fn is_custom_ignored(&self, rel: &Path, is_dir: bool) -> bool {
        self.custom_match(rel, is_dir) == Some(true)
    }

    fn custom_match(&self, rel: &Path, is_dir: bool) -> Option<bool> {
        if rel.as_os_str().is_empty() {
            return None;
        }
        match_with_parents(rel, is_dir, |path, is_dir| {
            decide(self.custom.matched(path, is_dir))
        })
    }

    fn gitignore_match(&self, rel: &Path, is_dir: bool) -> Option<bool> {
        match_with_parents(rel, is_dir, |path, is_dir| self.gitignore_level(path, is_dir))
    }

    /// The deepest scoped `.gitignore` with a rule for `rel` itself decides.
    fn gitignore_level(&self, rel: &Path, is_dir: bool) -> Option<bool> {
        for scoped in &self.gitignores {
            let Ok(sub) = rel.strip_prefix(&scoped.dir) else {
                continue;
            };
            if sub.as_os_str().is_empty() {
                continue;
            }
            if let Some(ignored) = decide(scoped.matcher.matched(sub, is_dir)) {
                return Some(ignored);
            }
        }
        None
    }
}

/// Matches `rel` the way git does: once a parent directory is excluded,
/// nothing below it can be re-included, so parents are checked first.
fn match_with_parents(
    rel: &Path,
    is_dir: bool,
    matched: impl Fn(&Path, bool) -> Option<bool>,
) -> Option<bool> {
    let mut parents: Vec<&Path> = rel
        .ancestors()
        .skip(1)
        .filter(|dir| !dir.as_os_str().is_empty())
        .collect();
    parents.reverse();
    if parents.into_iter().any(|dir| matched(dir, true) == Some(true)) {
        return Some(true);
    }
    matched(rel, is_dir)
}

fn decide<T>(m: Match<T>) -> Option<bool> {
    match m {
        Match::None => None,
        Match::Ignore(_) => Some(true),
        Match::Whitelist(_) => Some(false),
    }
}

fn add_line(
    builder: &mut GitignoreBuilder,
    source: Option<&Path>,
    line: &str,
    line_no: usize,
    warnings: &mut Vec<Warning>,
) {
    if let Err(e) = builder.add_line(source.map(Path::to_path_buf), line) {
        let origin = source.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from(line));
        tracing::warn!(
            "Skipping malformed ignore pattern {:?} ({}:{}): {}",
            line,
            origin.display(),
            line_no,
            e
        );
        warnings.push(Warning::new(origin, format!("line {line_no}: {e}")));
    }
}

fn build_matcher(builder: &GitignoreBuilder, origin: &Path, warnings: &mut Vec<Warning>) -> Gitignore {
    builder.build().unwrap_or_else(|e| {
        tracing::error!("Failed to build ignore matcher for {}: {}", origin.display(), e);
        warnings.push(Warning::new(origin, e));
        Gitignore::empty()
    })
}

fn read_rules_file(path: &Path, warnings: &mut Vec<Warning>) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(content) => Some(content),
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => {
            tracing::warn!("Could not read ignore file {}: {}", path.display(), e);
            warnings.push(Warning::new(path, e));
            None
        }
    }
}

/// Builds a `GlobSet` from explicit glob patterns.
///
/// For a pattern like `target/` two globs are added: one for the path itself
/// and one (`target/**`) for everything inside it.
fn build_globset<S: AsRef<str>>(patterns: &[S], warnings: &mut Vec<Warning>) -> GlobSet {
    let mut builder = GlobSetBuilder::new();

    for pattern in patterns {
        let trimmed_pattern = pattern.as_ref().trim();
        if trimmed_pattern.is_empty() || trimmed_pattern.starts_with('#') {
            continue;
        }
        let bare = trimmed_pattern
            .trim_start_matches("./")
            .trim_end_matches('/');
        let anchored = bare.contains('/');
        let bare = bare.trim_start_matches('/');
        let stem = if anchored {
            bare.to_string()
        } else {
            format!("**/{bare}")
        };

        for glob in [stem.clone(), format!("{stem}/**")] {
            match GlobBuilder::new(&glob).literal_separator(true).build() {
                Ok(glob) => {
                    builder.add(glob);
                }
                Err(e) => {
                    tracing::warn!("Skipping invalid glob {:?}: {}", trimmed_pattern, e);
                    warnings.push(Warning::new(trimmed_pattern, e));
                    break;
                }
            }
        }
    }

    builder.build().unwrap_or_else(|e| {
        tracing::error!("Failed to build glob set from patterns: {}", e);
        GlobSet::empty()
    })
}
