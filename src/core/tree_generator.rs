//! Generates an ASCII representation of a directory tree.

use super::node::{FileNode, Selection};

/// Controls which nodes of a scanned tree end up in the diagram.
#[derive(Debug, Clone, Copy)]
pub struct TreeOptions<'a> {
    /// Deepest level rendered; the root is level 0.
    pub max_depth: Option<usize>,
    /// Render ignored nodes as well.
    pub show_ignored: bool,
    /// Files listed here are rendered even when ignored.
    pub selection: Option<&'a Selection>,
}

impl Default for TreeOptions<'_> {
    fn default() -> Self {
        Self {
            max_depth: None,
            show_ignored: false,
            selection: None,
        }
    }
}

/// A utility struct for generating an ASCII directory tree.
///
/// This struct is stateless and provides methods as associated functions.
pub struct TreeGenerator;

impl TreeGenerator {
    /// Renders `root` and its descendants. Children keep the tree order (name
    /// sorted), directories carry a trailing `/`.
    pub fn generate_tree(root: &FileNode, options: &TreeOptions<'_>) -> String {
        let mut result = format!("{}/\n", root.name);
        Self::render_children(root, &mut result, "", 1, options);
        result
    }

    fn render_children(
        node: &FileNode,
        result: &mut String,
        prefix: &str,
        depth: usize,
        options: &TreeOptions<'_>,
    ) {
        if options.max_depth.is_some_and(|max| depth > max) {
            return;
        }

        let shown: Vec<&FileNode> = node
            .children
            .iter()
            .filter(|child| Self::is_shown(child, options))
            .collect();

        for (i, child) in shown.iter().enumerate() {
            let is_last = i == shown.len() - 1;
            let connector = if is_last { "└── " } else { "├── " };
            let suffix = if child.is_directory { "/" } else { "" };
            result.push_str(&format!("{prefix}{connector}{}{suffix}\n", child.name));

            if child.is_directory && !child.children.is_empty() {
                let new_prefix = if is_last {
                    format!("{prefix}    ")
                } else {
                    format!("{prefix}│   ")
                };
                Self::render_children(child, result, &new_prefix, depth + 1, options);
            }
        }
    }

    fn is_shown(node: &FileNode, options: &TreeOptions<'_>) -> bool {
        if options.show_ignored || node.is_visible() {
            return true;
        }
        if node.is_directory {
            node.children.iter().any(|child| Self::is_shown(child, options))
        } else {
            options
                .selection
                .is_some_and(|selection| selection.contains(&node.rel_path))
        }
    }
}
