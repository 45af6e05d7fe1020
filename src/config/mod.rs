pub mod settings;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const MIB: u64 = 1024 * 1024;

/// Limits and filters for one scan. Passed by value into the scanner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScanConfig {
    /// Maximum number of files placed in the tree.
    pub max_files: u64,
    /// Maximum size of any single file in bytes.
    pub max_file_size: u64,
    /// Maximum cumulative size of all files in the tree.
    pub max_memory: u64,
    /// Worker threads for filesystem I/O.
    pub workers: usize,
    pub include_hidden: bool,
    /// Walk and tag ignored entries instead of omitting them.
    pub include_ignored: bool,
    /// Explicit include globs. A matching path is never ignored.
    pub include: Vec<String>,
    /// Explicit exclude globs.
    pub exclude: Vec<String>,
    pub respect_gitignore: bool,
    /// User-defined ignore rules in `.gitignore` syntax.
    pub custom_patterns: Vec<String>,
    /// User-defined ignore file, resolved against the scan root when relative.
    pub custom_ignore_file: Option<PathBuf>,
    pub use_builtin_ignores: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_files: 100_000,
            max_file_size: 20 * MIB,
            max_memory: 512 * MIB,
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            include_hidden: false,
            include_ignored: false,
            include: Vec::new(),
            exclude: Vec::new(),
            respect_gitignore: true,
            custom_patterns: Vec::new(),
            custom_ignore_file: None,
            use_builtin_ignores: true,
        }
    }
}

/// Controls how a selection is turned into a document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AssemblyConfig {
    /// Deepest level drawn in the diagram; `None` draws everything.
    pub max_tree_depth: Option<usize>,
    /// Budget for the concatenated content sections in bytes.
    pub max_content_bytes: u64,
    /// Draw ignored nodes in the diagram. Selected files are always drawn.
    pub show_ignored_in_tree: bool,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            max_tree_depth: None,
            max_content_bytes: 10 * MIB,
            show_ignored_in_tree: false,
        }
    }
}

/// Everything the command-line front end reads from its settings file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub scan: ScanConfig,
    pub assembly: AssemblyConfig,
}
