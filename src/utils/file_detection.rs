use std::path::Path;

const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "markdown", "rst", "adoc",
    "rs", "py", "js", "ts", "jsx", "tsx", "java", "c", "cpp", "cxx", "cc", "h", "hpp", "hxx",
    "go", "rb", "php", "swift", "kt", "kts", "scala", "clj", "hs", "ml", "fs", "fsx",
    "html", "htm", "xml", "css", "scss", "sass", "less", "svg", "vue", "svelte",
    "json", "yaml", "yml", "toml", "ini", "cfg", "conf", "properties",
    "sql", "sh", "bash", "zsh", "fish", "ps1", "bat", "cmd", "cmake", "gradle",
    "tex", "r", "pl", "lua", "vim", "el", "dart", "elm", "ex", "exs", "erl", "nim", "zig",
    "log", "diff", "patch", "env", "lock", "sum", "mod", "mjs", "cjs",
    "graphql", "gql", "prisma", "proto", "jsonl", "csv", "tsv", "ipynb", "pyi", "nix",
];

const BINARY_EXTENSIONS: &[&str] = &[
    "exe", "dll", "so", "dylib", "deb", "rpm", "msi",
    "zip", "tar", "gz", "bz2", "xz", "7z", "rar", "jar", "war",
    "mp3", "mp4", "avi", "mkv", "mov", "wmv", "flv", "webm", "wav",
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx",
    "bin", "dat", "db", "sqlite", "sqlite3",
    "rlib", "rmeta", "pdb", "a", "lib", "obj", "o", "class", "pyc", "pyo", "wasm",
    "jpg", "jpeg", "png", "gif", "bmp", "ico", "webp", "tiff", "tif", "heic", "avif",
    "woff", "woff2", "ttf", "otf",
];

/// How many leading bytes are inspected when the extension is inconclusive.
const SNIFF_LEN: usize = 1024;

/// Decides whether `bytes`, read from `path`, should be shown as text.
///
/// Known extensions decide first. Otherwise the first KiB is inspected: a NUL
/// byte or invalid UTF-8 means binary.
pub fn is_text_content(path: &Path, bytes: &[u8]) -> bool {
    if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
        let ext_lower = extension.to_lowercase();
        if TEXT_EXTENSIONS.contains(&ext_lower.as_str()) {
            return true;
        }
        if BINARY_EXTENSIONS.contains(&ext_lower.as_str()) {
            return false;
        }
    }

    let sample = &bytes[..bytes.len().min(SNIFF_LEN)];
    if sample.contains(&0) {
        return false;
    }
    match std::str::from_utf8(sample) {
        Ok(_) => true,
        // A multi-byte character cut off by the sample boundary is still text.
        Err(e) => e.error_len().is_none() && sample.len() == SNIFF_LEN,
    }
}
