pub mod assembler;
pub mod error;
pub mod ignore;
pub mod node;
pub mod progress;
pub mod scanner;
pub mod tree_generator;

pub use assembler::{estimate_tokens, Assembler, AssemblyResult, ContentSection};
pub use error::{CoreError, Limit, Warning};
pub use ignore::{IgnoreEngine, IgnoreTier, Verdict};
pub use node::{FileNode, Selection};
pub use progress::{NoProgress, Progress, ProgressSink, Stage};
pub use scanner::{DirectoryScanner, ScanOutcome, ScanStats};
pub use tree_generator::{TreeGenerator, TreeOptions};
