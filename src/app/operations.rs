//! The scan and assemble steps wrapped as coordinator operations.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::coordinator::Operation;
use crate::config::{AssemblyConfig, ScanConfig};
use crate::core::{
    Assembler, AssemblyResult, CoreError, DirectoryScanner, FileNode, ProgressSink, ScanOutcome,
    Selection,
};

#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub root: PathBuf,
    pub config: ScanConfig,
}

pub struct ScanOperation;

impl Operation for ScanOperation {
    type Input = ScanRequest;
    type Output = ScanOutcome;

    fn run(
        &self,
        request: ScanRequest,
        cancel: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> Result<ScanOutcome, CoreError> {
        DirectoryScanner::new(request.config).scan_with_progress(&request.root, cancel, progress)
    }
}

/// The tree is shared so a caller can keep showing it while assembling.
#[derive(Debug, Clone)]
pub struct AssembleRequest {
    pub tree: Arc<FileNode>,
    pub selection: Selection,
    pub config: AssemblyConfig,
}

pub struct AssembleOperation;

impl Operation for AssembleOperation {
    type Input = AssembleRequest;
    type Output = AssemblyResult;

    fn run(
        &self,
        request: AssembleRequest,
        cancel: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> Result<AssemblyResult, CoreError> {
        Assembler::new(request.config).assemble_with_progress(
            &request.tree,
            &request.selection,
            cancel,
            progress,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::coordinator::{Coordinator, Status};
    use crate::core::Stage;
    use crate::utils::test_helpers::write_file;
    use tempfile::tempdir;
    use tokio::runtime::Handle;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_scan_then_assemble() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "src/lib.rs", "pub fn f() {}\n");
        write_file(dir.path(), "notes.md", "notes\n");

        let mut scan = Coordinator::new(Handle::current());
        scan.start(
            ScanOperation,
            ScanRequest {
                root: dir.path().to_path_buf(),
                config: ScanConfig::default(),
            },
        )
        .unwrap();
        let mut stages = Vec::new();
        let outcome = scan.wait(|p| stages.push(p.stage)).await.unwrap();
        assert!(stages.iter().all(|s| *s == Stage::Scanning));

        let tree = Arc::new(outcome.root);
        let mut assemble = Coordinator::new(Handle::current());
        assemble
            .start(
                AssembleOperation,
                AssembleRequest {
                    selection: ["src/lib.rs"].into_iter().collect(),
                    tree: tree.clone(),
                    config: AssemblyConfig::default(),
                },
            )
            .unwrap();
        let result = assemble.wait(|_| {}).await.unwrap();

        assert_eq!(assemble.status(), Status::Done);
        assert_eq!(result.files_included, 1);
        assert!(result.content.starts_with("src/lib.rs (rust)\n"));
        assert!(result.tree.contains("notes.md"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_scan_failure_surfaces_through_coordinator() {
        let dir = tempdir().unwrap();
        let mut scan = Coordinator::new(Handle::current());
        scan.start(
            ScanOperation,
            ScanRequest {
                root: dir.path().join("missing"),
                config: ScanConfig::default(),
            },
        )
        .unwrap();
        assert!(matches!(scan.wait(|_| {}).await, Err(CoreError::Io(..))));
        assert_eq!(scan.status(), Status::Failed);
    }
}
