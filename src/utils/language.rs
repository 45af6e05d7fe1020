use std::path::Path;

/// Marker used when no language can be derived from the file name.
pub const UNKNOWN_LANGUAGE: &str = "text";

/// Best-effort display language for a file, derived from its extension or
/// from a few well-known file names.
pub fn get_language_from_path(path: &Path) -> &'static str {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    match file_name {
        "Dockerfile" | "Containerfile" => return "dockerfile",
        "Makefile" | "GNUmakefile" => return "makefile",
        "CMakeLists.txt" => return "cmake",
        _ => {}
    }

    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("rs") => "rust",
        Some("js") | Some("mjs") | Some("cjs") | Some("jsx") => "javascript",
        Some("ts") | Some("tsx") => "typescript",
        Some("py") | Some("pyi") => "python",
        Some("go") => "go",
        Some("java") => "java",
        Some("kt") | Some("kts") => "kotlin",
        Some("swift") => "swift",
        Some("rb") => "ruby",
        Some("php") => "php",
        Some("c") | Some("h") => "c",
        Some("cpp") | Some("cc") | Some("hpp") | Some("cxx") | Some("hxx") => "cpp",
        Some("cs") => "csharp",
        Some("scala") => "scala",
        Some("hs") => "haskell",
        Some("ex") | Some("exs") => "elixir",
        Some("lua") => "lua",
        Some("zig") => "zig",
        Some("html") | Some("htm") => "html",
        Some("css") | Some("scss") | Some("sass") | Some("less") => "css",
        Some("vue") => "vue",
        Some("svelte") => "svelte",
        Some("json") | Some("jsonl") => "json",
        Some("md") | Some("markdown") => "markdown",
        Some("toml") => "toml",
        Some("yaml") | Some("yml") => "yaml",
        Some("xml") | Some("svg") => "xml",
        Some("sql") => "sql",
        Some("sh") | Some("bash") | Some("zsh") => "shell",
        Some("ps1") => "powershell",
        Some("proto") => "protobuf",
        Some("graphql") | Some("gql") => "graphql",
        Some("nix") => "nix",
        _ => UNKNOWN_LANGUAGE,
    }
}
