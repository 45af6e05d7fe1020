//! Builds the final context document from a scanned tree and a selection.

use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::error::{CoreError, Warning};
use super::node::{FileNode, Selection};
use super::progress::{NoProgress, Progress, ProgressSink, Stage};
use super::tree_generator::{TreeGenerator, TreeOptions};
use crate::config::AssemblyConfig;
use crate::utils::file_detection::is_text_content;
use crate::utils::language::get_language_from_path;

pub const BINARY_PLACEHOLDER: &str = "[BINARY FILE - CONTENT SKIPPED]";

const FILE_START: &str = "=====================FILE-START==================";
const FILE_END: &str = "----------------------FILE-END-------------------";
const TREE_HEADING: &str = "# DIRECTORY TREE";
const TREE_RULE: &str = "====================================================";

/// Rough token count for `bytes` of assembled text. Deterministic and
/// monotonic, not tied to any particular tokenizer.
pub fn estimate_tokens(bytes: u64) -> u64 {
    bytes.div_ceil(4)
}

/// One selected file as it appears in the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentSection {
    pub rel_path: PathBuf,
    pub language: String,
    pub is_binary: bool,
    pub body: String,
}

impl ContentSection {
    fn from_bytes(rel_path: &Path, bytes: Vec<u8>) -> Self {
        let is_binary = !is_text_content(rel_path, &bytes);
        let body = if is_binary {
            BINARY_PLACEHOLDER.to_string()
        } else {
            match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
            }
        };
        Self {
            rel_path: rel_path.to_path_buf(),
            language: get_language_from_path(rel_path).to_string(),
            is_binary,
            body,
        }
    }

    /// The section exactly as it is written into the document.
    pub fn render(&self) -> String {
        let newline = if self.body.is_empty() || self.body.ends_with('\n') {
            ""
        } else {
            "\n"
        };
        format!(
            "{} ({})\n{FILE_START}\n{}{newline}{FILE_END}\n\n",
            slash_path(&self.rel_path),
            self.language,
            self.body
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AssemblyResult {
    /// ASCII diagram of the whole tree.
    pub tree: String,
    pub sections: Vec<ContentSection>,
    /// All rendered sections, concatenated in tree order.
    pub content: String,
    /// Byte length of [`AssemblyResult::document`].
    pub total_bytes: u64,
    pub token_estimate: u64,
    pub truncated: bool,
    /// The first selected file that no longer fit the budget.
    pub truncated_at: Option<PathBuf>,
    pub files_included: usize,
    pub warnings: Vec<Warning>,
}

impl AssemblyResult {
    /// The diagram followed by every content section.
    pub fn document(&self) -> String {
        let mut document = format!("{TREE_HEADING}\n{TREE_RULE}\n{}{TREE_RULE}\n", self.tree);
        if !self.content.is_empty() {
            document.push('\n');
            document.push_str(&self.content);
        }
        document
    }
}

pub struct Assembler {
    config: AssemblyConfig,
}

impl Assembler {
    pub fn new(config: AssemblyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AssemblyConfig {
        &self.config
    }

    pub fn assemble(&self, tree: &FileNode, selection: &Selection) -> Result<AssemblyResult, CoreError> {
        self.assemble_with_progress(tree, selection, &CancellationToken::new(), &NoProgress)
    }

    /// Renders the diagram, then collects the selected files in tree order
    /// until the content budget would overflow.
    pub fn assemble_with_progress(
        &self,
        tree: &FileNode,
        selection: &Selection,
        cancel: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> Result<AssemblyResult, CoreError> {
        checkpoint(cancel)?;
        progress.report(Progress::new(Stage::Rendering, 0, 1));
        let options = TreeOptions {
            max_depth: self.config.max_tree_depth,
            show_ignored: self.config.show_ignored_in_tree,
            selection: Some(selection),
        };
        let diagram = TreeGenerator::generate_tree(tree, &options);
        progress.report(Progress::new(Stage::Rendering, 1, 1));

        let mut warnings = Vec::new();
        for rel in selection.iter() {
            match tree.find(rel) {
                Some(node) if !node.is_directory => {}
                Some(_) => warnings.push(Warning::new(rel, "is a directory, not a file")),
                None => warnings.push(Warning::new(rel, "not found in the scanned tree")),
            }
        }

        let targets: Vec<&FileNode> = tree
            .iter()
            .filter(|node| !node.is_directory && selection.contains(&node.rel_path))
            .collect();
        let total = targets.len() as u64;
        tracing::info!(
            "Assembling {} selected file(s) with a budget of {} bytes",
            total,
            self.config.max_content_bytes
        );

        let mut content = String::new();
        let mut sections = Vec::new();
        let mut truncated_at = None;

        for (i, node) in targets.into_iter().enumerate() {
            checkpoint(cancel)?;
            progress.report(Progress::new(Stage::Collecting, i as u64, total));

            let bytes = match fs::read(&node.path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!("Skipping unreadable file {}: {}", node.path.display(), e);
                    warnings.push(Warning::new(&node.rel_path, e));
                    continue;
                }
            };
            let section = ContentSection::from_bytes(&node.rel_path, bytes);
            let rendered = section.render();

            if (content.len() + rendered.len()) as u64 > self.config.max_content_bytes {
                tracing::warn!(
                    "Content budget of {} bytes reached at {}; {} file(s) included",
                    self.config.max_content_bytes,
                    node.rel_path.display(),
                    sections.len()
                );
                truncated_at = Some(node.rel_path.clone());
                break;
            }
            content.push_str(&rendered);
            sections.push(section);
        }
        progress.report(Progress::new(Stage::Collecting, total, total));

        let truncated = truncated_at.is_some();
        if !selection.is_empty() && sections.is_empty() && !truncated {
            tracing::error!("None of the {} selected files could be read", selection.len());
            return Err(CoreError::Exhausted {
                attempted: selection.len(),
            });
        }

        let mut result = AssemblyResult {
            tree: diagram,
            files_included: sections.len(),
            sections,
            content,
            total_bytes: 0,
            token_estimate: 0,
            truncated,
            truncated_at,
            warnings,
        };
        result.total_bytes = result.document().len() as u64;
        result.token_estimate = estimate_tokens(result.total_bytes);
        tracing::info!(
            "Assembly completed: {} file(s), {} bytes, ~{} tokens",
            result.files_included,
            result.total_bytes,
            result.token_estimate
        );
        Ok(result)
    }
}

fn checkpoint(cancel: &CancellationToken) -> Result<(), CoreError> {
    if cancel.is_cancelled() {
        Err(CoreError::Cancelled)
    } else {
        Ok(())
    }
}

/// Relative path with `/` separators on every platform.
fn slash_path(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
