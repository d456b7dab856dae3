//! Chat CLI commands: list, show, create.
//!
//! These talk to the SQLite store directly and never contact the provider.

use anyhow::{Context, Result};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use uuid::Uuid;

use parley_core::chat::projection::ChatResponse;
use parley_types::chat::MessageRole;

use crate::state::ConcreteChatService;

/// List all chats with their message counts.
pub async fn list_chats(service: &ConcreteChatService, json: bool) -> Result<()> {
    let chats = service.list_chats().await?;

    if json {
        let rows: Vec<ChatResponse> = chats.iter().map(ChatResponse::from).collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if chats.is_empty() {
        println!();
        println!(
            "  {} No chats yet. Create one with: {}",
            style("i").blue().bold(),
            style("parley chats create").yellow()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("ID").fg(Color::White),
        Cell::new("Created").fg(Color::White),
        Cell::new("Messages").fg(Color::White),
    ]);

    for chat in &chats {
        let count = service.message_count(&chat.id).await?;
        table.add_row(vec![
            Cell::new(chat.id).fg(Color::Cyan),
            Cell::new(format_relative_time(&chat.created_at)).fg(Color::DarkGrey),
            Cell::new(count),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    println!(
        "  {} chat{}",
        style(chats.len()).bold(),
        if chats.len() == 1 { "" } else { "s" }
    );
    println!();

    Ok(())
}

/// Print one chat and its transcript.
pub async fn show_chat(service: &ConcreteChatService, id: &str, json: bool) -> Result<()> {
    let chat_id: Uuid = id
        .parse()
        .with_context(|| format!("'{id}' is not a valid chat ID"))?;
    let chat = service.get_chat(&chat_id).await?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&ChatResponse::from(&chat))?
        );
        return Ok(());
    }

    println!();
    println!(
        "  {} Chat {}",
        style("#").bold(),
        style(chat.id).cyan()
    );
    println!(
        "  {}",
        style(format!("created {}", chat.created_at.format("%Y-%m-%d %H:%M:%S UTC"))).dim()
    );
    println!();

    let messages = chat.messages.unwrap_or_default();
    if messages.is_empty() {
        println!("  {}", style("(no messages)").dim());
        println!();
        return Ok(());
    }

    for message in &messages {
        let label = match message.role {
            MessageRole::User => style("you").green().bold(),
            MessageRole::Assistant => style("assistant").cyan().bold(),
            MessageRole::System => style("system").yellow().bold(),
        };
        println!("  {label}");
        for line in message.content.lines() {
            println!("    {line}");
        }
        if message.truncated {
            println!("    {}", style("[interrupted]").red().dim());
        }
        println!();
    }

    Ok(())
}

/// Create an empty chat and print its ID.
pub async fn create_chat(service: &ConcreteChatService, json: bool) -> Result<()> {
    let chat = service.create_chat().await?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&ChatResponse::from(&chat))?
        );
    } else {
        println!(
            "  {} Created chat {}",
            style("+").green().bold(),
            style(chat.id).cyan()
        );
    }

    Ok(())
}

fn format_relative_time(dt: &chrono::DateTime<chrono::Utc>) -> String {
    let diff = chrono::Utc::now() - *dt;

    if diff.num_minutes() < 1 {
        "just now".to_string()
    } else if diff.num_hours() < 1 {
        format!("{}m ago", diff.num_minutes())
    } else if diff.num_days() < 1 {
        format!("{}h ago", diff.num_hours())
    } else if diff.num_days() < 30 {
        format!("{}d ago", diff.num_days())
    } else {
        dt.format("%Y-%m-%d").to_string()
    }
}
