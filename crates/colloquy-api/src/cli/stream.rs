//! Streaming CLI commands: send a message or regenerate one, printing the
//! answer as it arrives.
//!
//! Ctrl+C cancels the running stream; the truncated answer is kept.

use std::io::Write;

use anyhow::Result;
use console::style;
use futures_util::StreamExt;

use colloquy_core::chat::ingestor::ResponseStream;
use colloquy_types::stream::StreamUpdate;

use crate::cli::session::parse_id;
use crate::state::AppState;

/// Send `text` (to a new session unless `session` is given) and stream the reply.
///
/// # Examples
///
/// ```bash
/// colloquy send --owner alice "What is a borrow checker?"
/// colloquy send --owner alice --session <id> "Show an example"
/// ```
pub async fn send(
    state: &AppState,
    owner: &str,
    session: Option<&str>,
    text: &str,
    json: bool,
) -> Result<()> {
    let sid = match session {
        Some(id) => parse_id(id)?,
        None => {
            let created = state.chat_service.create_session(owner, None).await?;
            if !json {
                println!("  {} session {}", style("+").green(), style(created.id).dim());
            }
            created.id
        }
    };

    let stream = state.chat_service.send_message(&sid, owner, text).await?;
    relay(state, owner, stream, json).await
}

/// Regenerate an assistant message and stream the new variant.
pub async fn retry(
    state: &AppState,
    owner: &str,
    session_id: &str,
    message_id: &str,
    prompt: Option<String>,
    json: bool,
) -> Result<()> {
    let sid = parse_id(session_id)?;
    let mid = parse_id(message_id)?;
    let stream = state.chat_service.retry(&sid, owner, &mid, prompt).await?;
    relay(state, owner, stream, json).await?;

    if !json {
        let position = state.chat_service.position(&sid, owner, &mid).await?;
        println!(
            "  {}",
            style(format!("response {} of {}", position.position, position.total)).dim()
        );
    }
    Ok(())
}

/// Print updates until the stream ends. Ctrl+C requests cancellation and
/// keeps reading until the cancelled content has been stored.
async fn relay(state: &AppState, owner: &str, mut stream: ResponseStream, json: bool) -> Result<()> {
    let target = stream.target();
    let mut printed = 0usize;
    let mut cancel_sent = false;
    let mut stdout = std::io::stdout();

    loop {
        let update = tokio::select! {
            update = stream.next() => update,
            _ = tokio::signal::ctrl_c(), if !cancel_sent => {
                cancel_sent = true;
                state
                    .chat_service
                    .cancel(&target.session_id, owner, &target.message_id)
                    .await?;
                continue;
            }
        };
        let Some(update) = update else { break };

        if json {
            println!("{}", serde_json::to_string(&update)?);
            continue;
        }

        let content = match &update {
            StreamUpdate::Snapshot { content }
            | StreamUpdate::Completed { content }
            | StreamUpdate::Failed { content, .. }
            | StreamUpdate::Cancelled { content } => content,
        };
        if let Some(fresh) = content.get(printed..) {
            write!(stdout, "{fresh}")?;
            stdout.flush()?;
            printed = content.len();
        }

        match &update {
            StreamUpdate::Snapshot { .. } => {}
            StreamUpdate::Completed { .. } => println!(),
            StreamUpdate::Failed { error, .. } => {
                println!();
                println!("  {} {}", style("✗").red(), style(error).red());
            }
            StreamUpdate::Cancelled { .. } => {
                println!();
                println!("  {}", style("(cancelled)").yellow());
            }
        }
    }
    Ok(())
}
