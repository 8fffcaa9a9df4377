use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use spanstream_core::ChunkMode;

#[derive(Parser, Debug)]
#[command(
    name = "spanstream",
    version,
    about = "Replay text through the streaming classifier and print typed events"
)]
pub struct Cli {
    /// Text file to replay (reads stdin when omitted)
    pub input: Option<PathBuf>,

    /// How to cut the input into tokens
    #[arg(long, value_enum, default_value = "words")]
    pub chunk: Chunk,

    /// Pause between tokens, in milliseconds
    #[arg(long, default_value_t = 0)]
    pub delay_ms: u64,

    /// Model name reported in events
    #[arg(long, default_value = "replay")]
    pub model: String,

    /// Config file (defaults to ~/.config/spanstream/config.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override the idle timeout, in milliseconds
    #[arg(long)]
    pub idle_timeout_ms: Option<u64>,

    /// Inject an upstream failure after this many tokens
    #[arg(long)]
    pub fail_after: Option<usize>,

    /// Output framing
    #[arg(long, value_enum, default_value = "sse")]
    pub format: Format,

    /// Collect the whole response instead of streaming events
    #[arg(long)]
    pub complete: bool,

    /// Log level when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Chunk {
    Chars,
    Words,
    Lines,
}

impl From<Chunk> for ChunkMode {
    fn from(chunk: Chunk) -> Self {
        match chunk {
            Chunk::Chars => ChunkMode::Chars,
            Chunk::Words => ChunkMode::Words,
            Chunk::Lines => ChunkMode::Lines,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// `data: {json}` frames separated by blank lines
    Sse,
    /// One JSON object per line
    Jsonl,
}

impl Format {
    pub fn frame(&self, payload: &str) -> String {
        match self {
            Format::Sse => format!("data: {}\n\n", payload),
            Format::Jsonl => format!("{}\n", payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["spanstream"]).unwrap();
        assert_eq!(cli.chunk, Chunk::Words);
        assert_eq!(cli.format, Format::Sse);
        assert_eq!(cli.model, "replay");
        assert!(cli.input.is_none());
        assert!(!cli.complete);
    }

    #[test]
    fn test_cli_flags() {
        let cli = Cli::try_parse_from([
            "spanstream",
            "notes.md",
            "--chunk",
            "chars",
            "--delay-ms",
            "10",
            "--format",
            "jsonl",
            "--fail-after",
            "3",
        ])
        .unwrap();
        assert_eq!(cli.input, Some(PathBuf::from("notes.md")));
        assert_eq!(cli.chunk, Chunk::Chars);
        assert_eq!(cli.delay_ms, 10);
        assert_eq!(cli.format, Format::Jsonl);
        assert_eq!(cli.fail_after, Some(3));
    }

    #[test]
    fn test_frames() {
        assert_eq!(Format::Sse.frame("{}"), "data: {}\n\n");
        assert_eq!(Format::Jsonl.frame("{}"), "{}\n");
    }
}
