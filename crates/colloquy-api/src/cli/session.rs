//! Session browsing CLI commands: list, show, delete.

use anyhow::{Context, Result};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use uuid::Uuid;

use colloquy_core::chat::versions;
use colloquy_types::chat::{MessageRole, MessageStatus};

use crate::state::AppState;

pub(crate) fn parse_id(s: &str) -> Result<Uuid> {
    s.parse::<Uuid>().with_context(|| format!("'{s}' is not a valid id"))
}

fn truncate(text: &str, max: usize) -> String {
    let single_line = text.replace('\n', " ");
    if single_line.chars().count() > max {
        let cut: String = single_line.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    } else {
        single_line
    }
}

/// List an owner's sessions with title, model, message count and last update.
///
/// # Examples
///
/// ```bash
/// colloquy sessions --owner alice
/// colloquy sessions --owner alice --json
/// ```
pub async fn list_sessions(state: &AppState, owner: &str, json: bool) -> Result<()> {
    let sessions = state.chat_service.list_sessions(owner).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
        return Ok(());
    }

    if sessions.is_empty() {
        println!();
        println!(
            "  {} No sessions for '{}'. Start one with: {}",
            style("i").blue().bold(),
            style(owner).cyan(),
            style(format!("colloquy send --owner {owner} \"Hello\"")).yellow()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("ID").fg(Color::White),
        Cell::new("Title").fg(Color::White),
        Cell::new("Model").fg(Color::White),
        Cell::new("Messages").fg(Color::White),
        Cell::new("Updated").fg(Color::White),
    ]);

    for session in &sessions {
        table.add_row(vec![
            Cell::new(session.id.to_string()).fg(Color::DarkGrey),
            Cell::new(truncate(&session.title, 40)).fg(Color::Cyan),
            Cell::new(&session.model).fg(Color::White),
            Cell::new(session.messages.len().to_string()).fg(Color::White),
            Cell::new(session.updated_at.format("%Y-%m-%d %H:%M").to_string()).fg(Color::DarkGrey),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    println!(
        "  {} session{}",
        style(sessions.len()).bold(),
        if sessions.len() == 1 { "" } else { "s" }
    );
    println!();
    Ok(())
}

/// Print a session transcript, with "k/n" markers on regenerated answers.
pub async fn show_session(state: &AppState, session_id: &str, owner: &str, json: bool) -> Result<()> {
    let sid = parse_id(session_id)?;
    let session = state.chat_service.get_session(&sid, owner).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&session)?);
        return Ok(());
    }

    println!();
    println!(
        "  {}  {}",
        style(&session.title).cyan().bold(),
        style(format!("({})", session.model)).dim()
    );
    println!();

    for message in &session.messages {
        let who = match message.role {
            MessageRole::User => style("you".to_string()).green().bold(),
            MessageRole::Assistant => style("assistant".to_string()).magenta().bold(),
            MessageRole::System => style("system".to_string()).dim(),
        };
        let mut marker = String::new();
        if !message.response_history.is_empty() {
            let pos = versions::position(message);
            marker = format!(" [{}/{}]", pos.position, pos.total);
        }
        let status = match message.status {
            MessageStatus::Complete => String::new(),
            other => format!(" ({other})"),
        };
        println!(
            "  {}{}{}  {}",
            who,
            style(marker).dim(),
            style(status).yellow(),
            style(message.id).dim()
        );
        for line in message.content.lines() {
            println!("    {line}");
        }
        if let Some(error) = &message.error {
            println!("    {}", style(format!("error: {error}")).red());
        }
        println!();
    }
    Ok(())
}

pub async fn delete_session(state: &AppState, session_id: &str, owner: &str, json: bool) -> Result<()> {
    let sid = parse_id(session_id)?;
    state.chat_service.delete_session(&sid, owner).await?;

    if json {
        println!("{}", serde_json::json!({ "deleted": true, "id": sid }));
    } else {
        println!("  {} Deleted session {}", style("✓").green(), style(sid).dim());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_flattens_and_shortens() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("line one\nline two", 100), "line one line two");
        assert_eq!(truncate("abcdefghijkl", 8), "abcde...");
    }

    #[test]
    fn parse_id_rejects_garbage() {
        assert!(parse_id("nope").is_err());
        assert!(parse_id(&Uuid::now_v7().to_string()).is_ok());
    }
}
