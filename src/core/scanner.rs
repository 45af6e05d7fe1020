//! Concurrent directory scanner.
//!
//! Sibling entries are stat-ed and subdirectories descended in parallel on a
//! bounded rayon pool. Each directory collects its children in the thread
//! that read it and sorts them by name, so the resulting tree does not depend
//! on which worker finished first.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use rayon::prelude::*;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::error::{CoreError, Limit, Warning};
use super::ignore::{IgnoreEngine, IgnoreTier};
use super::node::FileNode;
use super::progress::{NoProgress, Progress, ProgressSink, Stage};
use crate::config::ScanConfig;

const PROGRESS_UPDATE_INTERVAL: u64 = 25;

/// Counters describing a finished scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanStats {
    pub files: u64,
    pub directories: u64,
    pub total_bytes: u64,
    /// Nodes kept in the tree but tagged as ignored.
    pub ignored: u64,
}

/// The tree produced by a scan, plus the entries that had to be skipped.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub root: FileNode,
    pub warnings: Vec<Warning>,
    pub stats: ScanStats,
}

pub struct DirectoryScanner {
    config: ScanConfig,
}

impl DirectoryScanner {
    pub fn new(config: ScanConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Scans `root` without progress reporting or cancellation.
    pub fn scan(&self, root: &Path) -> Result<ScanOutcome, CoreError> {
        self.scan_with_progress(root, &CancellationToken::new(), &NoProgress)
    }

    /// Scans `root`, reporting progress to `progress` and stopping with
    /// [`CoreError::Cancelled`] once `cancel` fires.
    pub fn scan_with_progress(
        &self,
        root: &Path,
        cancel: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> Result<ScanOutcome, CoreError> {
        let root = fs::canonicalize(root).map_err(|e| CoreError::Io(e, root.to_path_buf()))?;
        if !root.is_dir() {
            return Err(CoreError::NotADirectory(root));
        }
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }

        let engine = IgnoreEngine::from_config(&root, &self.config, cancel)?;
        self.scan_with_engine(&root, &engine, cancel, progress)
    }

    /// Scans `root` with an ignore engine the caller has already loaded.
    /// `root` must be the canonical path the engine was created for.
    pub fn scan_with_engine(
        &self,
        root: &Path,
        engine: &IgnoreEngine,
        cancel: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> Result<ScanOutcome, CoreError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers.max(1))
            .thread_name(|idx| format!("scan-worker-{idx}"))
            .build()
            .map_err(|e| CoreError::WorkerPool(e.to_string()))?;

        tracing::info!(
            "Scanning {} with {} worker(s)",
            root.display(),
            self.config.workers.max(1)
        );
        progress.report(Progress::new(Stage::Scanning, 0, 0));

        let walk = Walk::new(&self.config, engine, cancel, progress);
        let children = match pool.install(|| walk.read_children(root, Path::new(""), false)) {
            Ok(children) => children,
            Err(e) => {
                if e.is_cancelled() {
                    tracing::info!("Scan of {} cancelled", root.display());
                } else {
                    tracing::warn!("Scan of {} aborted: {}", root.display(), e);
                }
                return Err(e);
            }
        };

        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| root.display().to_string());
        let tree = FileNode::directory(name, root.to_path_buf(), PathBuf::new(), children);

        let (mut warnings, stats) = walk.finish();
        let mut all_warnings = engine.warnings().to_vec();
        all_warnings.append(&mut warnings);
        // Discovery and the walk both report an unreadable directory.
        all_warnings.sort_by(|a, b| a.path.cmp(&b.path));
        all_warnings.dedup_by(|a, b| a.path == b.path);

        let done = stats.files + stats.directories;
        progress.report(Progress::new(Stage::Scanning, done, done));
        tracing::info!(
            "Scan completed: {} files, {} directories, {} ignored, {} warning(s)",
            stats.files,
            stats.directories,
            stats.ignored,
            all_warnings.len()
        );

        Ok(ScanOutcome {
            root: tree,
            warnings: all_warnings,
            stats,
        })
    }
}

/// An entry that passed classification and still has to be built.
struct Candidate {
    name: String,
    path: PathBuf,
    rel: PathBuf,
    is_dir: bool,
    gitignored: bool,
    custom_ignored: bool,
    ignored: bool,
    /// Ignored directory walked only to find explicitly included files.
    rescue: bool,
}

/// State shared by all workers of one scan.
struct Walk<'a> {
    config: &'a ScanConfig,
    engine: &'a IgnoreEngine,
    cancel: &'a CancellationToken,
    progress: &'a dyn ProgressSink,
    files: AtomicU64,
    directories: AtomicU64,
    memory: AtomicU64,
    ignored: AtomicU64,
    discovered: AtomicU64,
    processed: AtomicU64,
    last_report: Mutex<u64>,
    warnings: Mutex<Vec<Warning>>,
}

impl<'a> Walk<'a> {
    fn new(
        config: &'a ScanConfig,
        engine: &'a IgnoreEngine,
        cancel: &'a CancellationToken,
        progress: &'a dyn ProgressSink,
    ) -> Self {
        Self {
            config,
            engine,
            cancel,
            progress,
            files: AtomicU64::new(0),
            directories: AtomicU64::new(0),
            memory: AtomicU64::new(0),
            ignored: AtomicU64::new(0),
            discovered: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            last_report: Mutex::new(0),
            warnings: Mutex::new(Vec::new()),
        }
    }

    fn checkpoint(&self) -> Result<(), CoreError> {
        if self.cancel.is_cancelled() {
            Err(CoreError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn warn(&self, path: &Path, message: impl std::fmt::Display) {
        tracing::warn!("Skipping {}: {}", path.display(), message);
        self.warnings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Warning::new(path, message));
    }

    /// Reads, classifies and builds the children of one directory.
    /// `parent_ignored` is set when the directory itself is tagged ignored.
    fn read_children(
        &self,
        abs: &Path,
        rel: &Path,
        parent_ignored: bool,
    ) -> Result<Vec<FileNode>, CoreError> {
        self.checkpoint()?;
        let entries = match fs::read_dir(abs) {
            Ok(entries) => entries,
            Err(e) if rel.as_os_str().is_empty() => {
                return Err(CoreError::Io(e, abs.to_path_buf()))
            }
            Err(e) => {
                self.warn(abs, e);
                return Ok(Vec::new());
            }
        };

        let mut candidates = Vec::new();
        for entry in entries {
            self.checkpoint()?;
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    self.warn(abs, e);
                    continue;
                }
            };
            let file_type = match entry.file_type() {
                Ok(file_type) => file_type,
                Err(e) => {
                    self.warn(&entry.path(), e);
                    continue;
                }
            };
            if let Some(candidate) = self.classify(&entry, rel, parent_ignored, file_type.is_dir()) {
                candidates.push(candidate);
            }
        }
        self.discovered
            .fetch_add(candidates.len() as u64, Ordering::Relaxed);

        let built = candidates
            .into_par_iter()
            .map(|candidate| self.build(candidate))
            .collect::<Result<Vec<_>, CoreError>>()?;

        let mut children: Vec<FileNode> = built.into_iter().flatten().collect();
        children.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(children)
    }

    /// Applies the ignore engine, then the hidden-entry rule. Returns `None`
    /// for entries that are left out of the tree entirely. Everything below an
    /// ignored directory stays ignored unless an explicit include names it.
    fn classify(
        &self,
        entry: &fs::DirEntry,
        parent_rel: &Path,
        parent_ignored: bool,
        is_dir: bool,
    ) -> Option<Candidate> {
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy().into_owned();
        let rel = parent_rel.join(&file_name);

        let verdict = self.engine.should_ignore(&rel, is_dir);
        if verdict.is_pruned() {
            tracing::trace!("Pruned {} ({:?})", rel.display(), verdict.tier);
            return None;
        }
        if !self.config.include_hidden && name.starts_with('.') {
            return None;
        }

        let ignored = verdict.ignored
            || (parent_ignored && verdict.tier != Some(IgnoreTier::Explicit));
        let mut rescue = false;
        if ignored && !self.config.include_ignored {
            if is_dir && self.engine.has_explicit_includes() {
                rescue = true;
            } else {
                return None;
            }
        }

        Some(Candidate {
            gitignored: self.engine.is_gitignored(&rel, is_dir),
            custom_ignored: self.engine.is_custom_ignored(&rel, is_dir),
            ignored,
            path: entry.path(),
            name,
            rel,
            is_dir,
            rescue,
        })
    }

    fn build(&self, candidate: Candidate) -> Result<Option<FileNode>, CoreError> {
        self.checkpoint()?;
        let built = self.build_node(&candidate);
        self.tick();

        let Some(mut node) = built? else {
            return Ok(None);
        };
        node.gitignored = candidate.gitignored;
        node.custom_ignored = candidate.custom_ignored;
        node.ignored = candidate.ignored;
        if node.ignored {
            self.ignored.fetch_add(1, Ordering::Relaxed);
        }
        Ok(Some(node))
    }

    fn build_node(&self, candidate: &Candidate) -> Result<Option<FileNode>, CoreError> {
        if candidate.is_dir {
            let children = self.read_children(&candidate.path, &candidate.rel, candidate.ignored)?;
            if candidate.rescue && children.is_empty() {
                return Ok(None);
            }
            self.directories.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(FileNode::directory(
                candidate.name.clone(),
                candidate.path.clone(),
                candidate.rel.clone(),
                children,
            )));
        }

        let metadata = match fs::symlink_metadata(&candidate.path) {
            Ok(metadata) => metadata,
            Err(e) => {
                self.warn(&candidate.path, e);
                return Ok(None);
            }
        };
        let size = metadata.len();
        self.charge(&candidate.rel, size)?;
        Ok(Some(FileNode::file(
            candidate.name.clone(),
            candidate.path.clone(),
            candidate.rel.clone(),
            size,
        )))
    }

    /// Accounts one file against the configured limits.
    fn charge(&self, rel: &Path, size: u64) -> Result<(), CoreError> {
        let limit_error = |limit, actual, max| CoreError::LimitExceeded {
            limit,
            actual,
            max,
            path: Some(rel.to_path_buf()),
        };

        if size > self.config.max_file_size {
            return Err(limit_error(Limit::FileSize, size, self.config.max_file_size));
        }
        let files = self.files.fetch_add(1, Ordering::Relaxed) + 1;
        if files > self.config.max_files {
            return Err(limit_error(Limit::FileCount, files, self.config.max_files));
        }
        let memory = self.memory.fetch_add(size, Ordering::Relaxed) + size;
        if memory > self.config.max_memory {
            return Err(limit_error(Limit::Memory, memory, self.config.max_memory));
        }
        Ok(())
    }

    fn tick(&self) {
        let processed = self.processed.fetch_add(1, Ordering::Relaxed) + 1;
        if processed % PROGRESS_UPDATE_INTERVAL != 0 {
            return;
        }
        // Counters only grow, so reading them under the lock keeps the
        // reported sequence monotonic across workers.
        let mut last = self
            .last_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let current = self.processed.load(Ordering::Relaxed);
        if current > *last {
            *last = current;
            let total = self.discovered.load(Ordering::Relaxed).max(current);
            self.progress
                .report(Progress::new(Stage::Scanning, current, total));
        }
    }

    fn finish(self) -> (Vec<Warning>, ScanStats) {
        let mut warnings = self
            .warnings
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        warnings.sort_by(|a, b| a.path.cmp(&b.path));
        let stats = ScanStats {
            files: self.files.into_inner(),
            directories: self.directories.into_inner(),
            total_bytes: self.memory.into_inner(),
            ignored: self.ignored.into_inner(),
        };
        (warnings, stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_helpers::{running_as_root, write_file};
    use std::sync::Arc;
    use tempfile::{tempdir, TempDir};

    fn test_config() -> ScanConfig {
        ScanConfig {
            workers: 4,
            ..ScanConfig::default()
        }
    }

    fn project() -> TempDir {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "src/main.rs", "fn main() {}");
        write_file(dir.path(), "src/lib.rs", "// lib");
        write_file(dir.path(), "README.md", "# readme");
        write_file(dir.path(), "docs/guide.txt", "guide");
        write_file(dir.path(), ".env", "SECRET=1");
        write_file(dir.path(), ".git/HEAD", "ref: refs/heads/main");
        write_file(dir.path(), "target/debug/app", "binary");
        write_file(dir.path(), ".gitignore", "target/\n");
        dir
    }

    fn rel_paths(node: &FileNode) -> Vec<String> {
        node.iter()
            .skip(1)
            .map(|n| n.rel_path.to_string_lossy().replace('\\', "/"))
            .collect()
    }

    #[test]
    fn test_scan_builds_sorted_tree() {
        let dir = project();
        let outcome = DirectoryScanner::new(test_config()).scan(dir.path()).unwrap();

        assert_eq!(
            rel_paths(&outcome.root),
            vec!["README.md", "docs", "docs/guide.txt", "src", "src/lib.rs", "src/main.rs"]
        );
        assert_eq!(outcome.root.rel_path, PathBuf::new());
        assert_eq!(outcome.stats.files, 4);
        assert_eq!(outcome.stats.directories, 2);
        assert_eq!(outcome.root.find("src/lib.rs").map(|n| n.size), Some(6));
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn test_include_ignored_tags_instead_of_omitting() {
        let dir = project();
        let config = ScanConfig {
            include_ignored: true,
            ..test_config()
        };
        let outcome = DirectoryScanner::new(config).scan(dir.path()).unwrap();

        let target = outcome.root.find("target").unwrap();
        assert!(target.gitignored && target.ignored && !target.custom_ignored);
        let app = outcome.root.find("target/debug/app").unwrap();
        assert!(app.gitignored && app.ignored);
        assert_eq!(outcome.stats.ignored, 3);
        // Built-in exclusions are never walked.
        assert!(outcome.root.find(".git").is_none());
    }

    #[test]
    fn test_include_hidden() {
        let dir = project();
        let config = ScanConfig {
            include_hidden: true,
            ..test_config()
        };
        let outcome = DirectoryScanner::new(config).scan(dir.path()).unwrap();

        assert!(outcome.root.find(".env").is_some());
        assert!(outcome.root.find(".gitignore").is_some());
        assert!(outcome.root.find(".git").is_none());
    }

    #[test]
    fn test_explicit_include_rescues_file_in_ignored_dir() {
        let dir = project();
        write_file(dir.path(), "target/keep/notes.md", "keep me");
        let config = ScanConfig {
            include: vec!["target/keep/notes.md".to_string()],
            ..test_config()
        };
        let outcome = DirectoryScanner::new(config).scan(dir.path()).unwrap();

        let notes = outcome.root.find("target/keep/notes.md").unwrap();
        assert!(!notes.ignored);
        assert!(notes.gitignored);
        assert!(outcome.root.find("target/debug").is_none());
    }

    #[test]
    fn test_everything_below_ignored_dir_is_tagged() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), ".gitignore", "target/\n!*.md\n");
        write_file(dir.path(), "target/notes.md", "notes");
        write_file(dir.path(), "target/out/report.md", "report");
        write_file(dir.path(), "src/a.rs", "// a");
        let config = ScanConfig {
            include_ignored: true,
            custom_patterns: vec!["!report.md".to_string()],
            ..test_config()
        };
        let tagged = DirectoryScanner::new(config).scan(dir.path()).unwrap();

        let notes = tagged.root.find("target/notes.md").unwrap();
        assert!(notes.ignored && notes.gitignored);
        // A custom whitelist cannot lift a file out of an ignored directory.
        let report = tagged.root.find("target/out/report.md").unwrap();
        assert!(report.ignored && report.gitignored && !report.custom_ignored);

        let plain = DirectoryScanner::new(test_config()).scan(dir.path()).unwrap();
        assert_eq!(rel_paths(&plain.root), vec!["src", "src/a.rs"]);
        assert_eq!(rel_paths(&tagged.root.visible_tree(false)), rel_paths(&plain.root));
    }

    #[test]
    fn test_custom_rules_are_tagged() {
        let dir = project();
        let config = ScanConfig {
            include_ignored: true,
            custom_patterns: vec!["docs/".to_string()],
            ..test_config()
        };
        let outcome = DirectoryScanner::new(config).scan(dir.path()).unwrap();

        let guide = outcome.root.find("docs/guide.txt").unwrap();
        assert!(guide.custom_ignored && guide.ignored && !guide.gitignored);
    }

    #[test]
    fn test_max_files_exceeded() {
        let dir = tempdir().unwrap();
        for i in 0..6 {
            write_file(dir.path(), &format!("f{i}.txt"), "x");
        }
        let config = ScanConfig {
            max_files: 5,
            ..test_config()
        };
        let err = DirectoryScanner::new(config).scan(dir.path()).unwrap_err();
        assert!(matches!(
            err,
            CoreError::LimitExceeded {
                limit: Limit::FileCount,
                actual: 6,
                max: 5,
                ..
            }
        ));
    }

    #[test]
    fn test_exactly_max_files_succeeds() {
        let dir = tempdir().unwrap();
        for i in 0..5 {
            write_file(dir.path(), &format!("f{i}.txt"), "x");
        }
        let config = ScanConfig {
            max_files: 5,
            ..test_config()
        };
        assert_eq!(DirectoryScanner::new(config).scan(dir.path()).unwrap().stats.files, 5);
    }

    #[test]
    fn test_file_size_and_memory_limits() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "a.txt", vec![b'a'; 100]);
        write_file(dir.path(), "b.txt", vec![b'b'; 100]);

        let config = ScanConfig {
            max_file_size: 99,
            ..test_config()
        };
        let err = DirectoryScanner::new(config).scan(dir.path()).unwrap_err();
        assert_eq!(err.limit(), Some(Limit::FileSize));

        let config = ScanConfig {
            max_memory: 150,
            ..test_config()
        };
        let err = DirectoryScanner::new(config).scan(dir.path()).unwrap_err();
        assert_eq!(err.limit(), Some(Limit::Memory));
    }

    #[test]
    fn test_cancelled_before_start() {
        let dir = project();
        let token = CancellationToken::new();
        token.cancel();
        let err = DirectoryScanner::new(test_config())
            .scan_with_progress(dir.path(), &token, &NoProgress)
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_cancelled_mid_scan_returns_no_tree() {
        let dir = tempdir().unwrap();
        for d in 0..20 {
            for f in 0..50 {
                write_file(dir.path(), &format!("d{d:02}/f{f:02}.txt"), "x");
            }
        }
        let token = CancellationToken::new();
        let trigger = token.clone();
        let sink = move |p: Progress| {
            if p.current > 0 {
                trigger.cancel();
            }
        };

        let err = DirectoryScanner::new(test_config())
            .scan_with_progress(dir.path(), &token, &sink)
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_progress_is_monotonic_and_ends_complete() {
        let dir = tempdir().unwrap();
        for d in 0..5 {
            for f in 0..30 {
                write_file(dir.path(), &format!("d{d}/f{f:02}.txt"), "x");
            }
        }
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let events = events.clone();
            move |p: Progress| events.lock().unwrap().push(p)
        };

        DirectoryScanner::new(test_config())
            .scan_with_progress(dir.path(), &CancellationToken::new(), &sink)
            .unwrap();

        let events = events.lock().unwrap();
        assert!(events.len() > 2);
        assert!(events.windows(2).all(|w| w[0].current <= w[1].current));
        assert!(events.iter().all(|p| p.stage == Stage::Scanning && p.current <= p.total));
        let last = events.last().unwrap();
        assert_eq!((last.current, last.total), (155, 155));
    }

    #[test]
    fn test_two_scans_are_identical() {
        let dir = project();
        let config = ScanConfig {
            include_ignored: true,
            workers: 8,
            ..ScanConfig::default()
        };
        let scanner = DirectoryScanner::new(config);
        let first = scanner.scan(dir.path()).unwrap();
        let second = scanner.scan(dir.path()).unwrap();
        assert_eq!(first.root, second.root);
    }

    #[test]
    fn test_root_must_be_a_directory() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "file.txt", "x");
        let scanner = DirectoryScanner::new(test_config());
        assert!(matches!(
            scanner.scan(&dir.path().join("file.txt")),
            Err(CoreError::NotADirectory(_))
        ));
        assert!(matches!(
            scanner.scan(&dir.path().join("missing")),
            Err(CoreError::Io(..))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_subdirectory_becomes_warning() {
        use std::os::unix::fs::PermissionsExt;
        if running_as_root() {
            return;
        }
        let dir = project();
        let locked = dir.path().join("locked");
        write_file(dir.path(), "locked/secret.txt", "x");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        let outcome = DirectoryScanner::new(test_config()).scan(dir.path());
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        let outcome = outcome.unwrap();
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].path.ends_with("locked"));
        assert!(outcome.root.find("locked").is_some());
        assert!(outcome.root.find("locked/secret.txt").is_none());
    }
}
