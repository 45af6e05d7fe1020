//! The scanned file tree and the caller's selection.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;

/// A node of the scanned tree.
///
/// A directory exclusively owns its children, which are sorted by name. The
/// tree is built once per scan and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileNode {
    pub name: String,
    /// Absolute path on disk.
    pub path: PathBuf,
    /// Path relative to the scan root; empty for the root itself.
    pub rel_path: PathBuf,
    pub is_directory: bool,
    pub children: Vec<FileNode>,
    /// Size in bytes; always 0 for directories.
    pub size: u64,
    /// A `.gitignore`-style file would exclude this node.
    pub gitignored: bool,
    /// The user-defined ignore rules would exclude this node.
    pub custom_ignored: bool,
    /// The combined verdict of all ignore tiers.
    pub ignored: bool,
}

impl FileNode {
    pub fn file(name: impl Into<String>, path: PathBuf, rel_path: PathBuf, size: u64) -> Self {
        Self {
            name: name.into(),
            path,
            rel_path,
            is_directory: false,
            children: Vec::new(),
            size,
            gitignored: false,
            custom_ignored: false,
            ignored: false,
        }
    }

    pub fn directory(
        name: impl Into<String>,
        path: PathBuf,
        rel_path: PathBuf,
        children: Vec<FileNode>,
    ) -> Self {
        Self {
            name: name.into(),
            path,
            rel_path,
            is_directory: true,
            children,
            size: 0,
            gitignored: false,
            custom_ignored: false,
            ignored: false,
        }
    }

    /// Whether a default view shows this node.
    pub fn is_visible(&self) -> bool {
        !self.ignored
    }

    /// Pre-order, name-sorted traversal starting at (and including) `self`.
    pub fn iter(&self) -> Iter<'_> {
        Iter { stack: vec![self] }
    }

    /// Looks up a node by its path relative to the scan root.
    pub fn find(&self, rel: impl AsRef<Path>) -> Option<&FileNode> {
        let mut current = self;
        for component in rel.as_ref().components() {
            let Component::Normal(name) = component else {
                continue;
            };
            let name = name.to_string_lossy().into_owned();
            current = current
                .children
                .binary_search_by(|child| child.name.cmp(&name))
                .ok()
                .map(|idx| &current.children[idx])?;
        }
        Some(current)
    }

    pub fn file_count(&self) -> usize {
        self.iter().filter(|n| !n.is_directory).count()
    }

    pub fn total_size(&self) -> u64 {
        self.iter().map(|n| n.size).sum()
    }

    /// Returns a copy of the tree as a UI would display it. With
    /// `show_ignored == false`, ignored nodes are dropped unless they contain a
    /// visible descendant. The root is always kept.
    pub fn visible_tree(&self, show_ignored: bool) -> FileNode {
        let mut root = self.clone();
        if !show_ignored {
            root.children = self
                .children
                .iter()
                .filter_map(Self::retain_visible)
                .collect();
        }
        root
    }

    fn retain_visible(node: &FileNode) -> Option<FileNode> {
        if !node.is_directory {
            return node.is_visible().then(|| node.clone());
        }
        let children: Vec<FileNode> = node
            .children
            .iter()
            .filter_map(Self::retain_visible)
            .collect();
        if node.is_visible() || !children.is_empty() {
            Some(FileNode {
                children,
                ..node.clone()
            })
        } else {
            None
        }
    }

    /// Returns a copy without directories that contain no file anywhere in
    /// their subtree. The root is always kept.
    pub fn prune_empty_dirs(&self) -> FileNode {
        let mut root = self.clone();
        root.children = self.children.iter().filter_map(Self::retain_nonempty).collect();
        root
    }

    fn retain_nonempty(node: &FileNode) -> Option<FileNode> {
        if !node.is_directory {
            return Some(node.clone());
        }
        let children: Vec<FileNode> = node
            .children
            .iter()
            .filter_map(Self::retain_nonempty)
            .collect();
        (!children.is_empty()).then(|| FileNode {
            children,
            ..node.clone()
        })
    }
}

/// Iterator returned by [`FileNode::iter`].
pub struct Iter<'a> {
    stack: Vec<&'a FileNode>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a FileNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

/// Relative file paths chosen for inclusion. Independent of ignore flags: an
/// ignored file can still be selected explicitly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    paths: BTreeSet<PathBuf>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Selects every visible file of `tree`.
    pub fn all_visible(tree: &FileNode) -> Self {
        tree.visible_tree(false)
            .iter()
            .filter(|n| !n.is_directory)
            .map(|n| n.rel_path.clone())
            .collect()
    }

    pub fn insert(&mut self, rel: impl AsRef<Path>) -> bool {
        self.paths.insert(normalize(rel.as_ref()))
    }

    pub fn contains(&self, rel: impl AsRef<Path>) -> bool {
        self.paths.contains(&normalize(rel.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathBuf> {
        self.paths.iter()
    }
}

impl<P: AsRef<Path>> FromIterator<P> for Selection {
    fn from_iter<I: IntoIterator<Item = P>>(iter: I) -> Self {
        let mut selection = Selection::new();
        for path in iter {
            selection.insert(path);
        }
        selection
    }
}

/// Drops `.` components and any leading `./` so `./src/a.rs` and
/// `src/a.rs` select the same file.
fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect()
}
