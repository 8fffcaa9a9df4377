//! Read-only pattern tables shared by every session

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::RegexSet;

/// The fence marker that opens and closes code blocks
pub const FENCE: &str = "```";

/// Fence info-string tags that mark a block as executable code.
///
/// Anything else after a fence (or a typo) renders as a generic fenced block.
static LANGUAGE_TAGS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        // Mainstream languages
        "python", "py", "javascript", "js", "typescript", "ts", "jsx", "tsx", "java",
        "kotlin", "kt", "scala", "groovy", "c", "h", "cpp", "c++", "cc", "hpp", "cxx",
        "csharp", "cs", "c#", "fsharp", "fs", "go", "golang", "rust", "rs", "swift",
        "objc", "objective-c", "ruby", "rb", "php", "perl", "pl", "lua", "r", "julia",
        "dart", "elixir", "ex", "erlang", "haskell", "hs", "clojure", "ocaml", "zig",
        "nim", "matlab", "fortran", "vb", "solidity", "wasm", "asm", "assembly",
        // Shell
        "bash", "sh", "shell", "zsh", "fish", "powershell", "ps1", "bat", "cmd",
        "console",
        // Markup and query
        "html", "xml", "css", "scss", "sass", "less", "svg", "latex", "tex", "sql",
        "graphql", "gql",
        // Config and data
        "json", "jsonc", "yaml", "yml", "toml", "ini", "dockerfile", "docker",
        "makefile", "make", "cmake", "nginx", "hcl", "terraform", "tf", "proto",
        "protobuf", "diff", "patch",
    ]
    .into_iter()
    .collect()
});

/// Markdown cues tested against the rolling window.
///
/// Patterns are deliberately permissive about unfinished constructs
/// (a lone list marker at the end of the window already counts) so a
/// span is recognised as soon as its opening delimiter streams in.
static MARKDOWN_CUES: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        // ATX headers
        r"(?m)^[ \t]{0,3}#{1,6}[ \t]",
        // Unordered list markers
        r"(?m)^[ \t]*[-*+]([ \t]|$)",
        // Ordered list markers
        r"(?m)^[ \t]*\d{1,3}[.)][ \t]",
        // Bold
        r"\*\*|__",
        // Italic
        r"(^|[^*\w])\*[^*\s]|(^|[^_\w])_[^_\s]",
        // Links
        r"\[[^\]\n]*\]\(",
        // Images
        r"!\[[^\]\n]*\]",
        // Inline code spans
        r"`[^`\n]+`",
        // Blockquotes
        r"(?m)^[ \t]{0,3}>([ \t]|$)",
        // Horizontal rules
        r"(?m)^[ \t]*(-{3,}|\*{3,}|_{3,})[ \t]*$",
        // Table rows
        r"(?m)^[ \t]*\|.*\|",
    ])
    .expect("markdown cue patterns are valid")
});

/// Look up a fence tag (case-insensitive)
pub fn is_language_tag(tag: &str) -> bool {
    LANGUAGE_TAGS.contains(tag.to_lowercase().as_str())
}

/// Whether any Markdown cue matches the given window
pub fn has_markdown_cue(window: &str) -> bool {
    MARKDOWN_CUES.is_match(window)
}
