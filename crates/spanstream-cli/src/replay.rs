//! Replay driver
//!
//! Feeds input text through a scripted provider and the full streaming
//! pipeline, writing each event frame as it is delivered.

use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use spanstream_core::{
    CompletionRequest, EventKind, ScriptedProvider, StreamConfig, StreamService,
};

use crate::cli::{Cli, Format};

/// Load config from an explicit path or the default location
pub fn load_config(path: Option<&Path>) -> Result<StreamConfig> {
    let config = match path {
        Some(path) => StreamConfig::load(path)?,
        None => StreamConfig::load_default()?,
    };
    Ok(config)
}

pub fn read_input(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display())),
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("failed to read stdin")?;
            Ok(text)
        }
    }
}

fn provider_for(cli: &Cli, text: &str) -> ScriptedProvider {
    let mut provider = ScriptedProvider::from_text(text, cli.chunk.into())
        .with_delay(Duration::from_millis(cli.delay_ms));
    if let Some(n) = cli.fail_after {
        provider = provider.fail_after(n, "injected failure");
    }
    provider
}

fn request_for(cli: &Cli) -> CompletionRequest {
    let mut request = CompletionRequest::new(&cli.model, "replay");
    if let Some(ms) = cli.idle_timeout_ms {
        request = request.with_idle_timeout(Duration::from_millis(ms));
    }
    request
}

/// Stream `text` and write every frame to `out`.
///
/// Returns the kind of the terminal event.
pub async fn replay<W: Write>(
    cli: &Cli,
    config: StreamConfig,
    text: &str,
    out: &mut W,
) -> Result<EventKind> {
    let service = StreamService::new(config, Arc::new(provider_for(cli, text)))?;

    if cli.complete {
        let completion = service.complete(request_for(cli)).await?;
        let payload = serde_json::to_string(&completion)?;
        out.write_all(cli.format.frame(&payload).as_bytes())?;
        out.flush()?;
        return Ok(EventKind::Done);
    }

    let mut stream = service.open_stream(request_for(cli)).await?;
    let mut last = EventKind::Error;
    let mut frames = 0usize;
    while let Some(event) = stream.next_event().await {
        last = event.kind;
        frames += 1;
        out.write_all(cli.format.frame(&event.to_wire()).as_bytes())?;
        out.flush()?;
    }

    info!(
        request_id = %stream.request_id(),
        frames,
        terminal = last.as_str(),
        "Replay: Finished"
    );
    Ok(last)
}

/// Write frames to stdout
pub async fn run(cli: &Cli) -> Result<EventKind> {
    let config = load_config(cli.config.as_deref())?;
    let text = read_input(cli.input.as_deref())?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    replay(cli, config, &text, &mut out).await
}
