use std::error::Error;
use std::io;

use chatbot_http::HttpClient;

use crate::render;

type CommandResult = Result<(), Box<dyn Error>>;

pub async fn print_config(client: &HttpClient) -> CommandResult {
    let config = client.config().await?;
    println!("model:          {}", config.model_name);
    println!("temperature:    {}", config.temperature);
    println!("max iterations: {}", config.max_iterations);
    if config.tools.is_empty() {
        println!("tools:          (none)");
    } else {
        println!("tools:          {}", config.tools.join(", "));
    }
    Ok(())
}

pub async fn list_sessions(client: &HttpClient) -> CommandResult {
    let sessions = client.list_sessions(None).await?;
    if sessions.is_empty() {
        println!("No sessions for {}.", client.user_id());
        return Ok(());
    }

    for session in sessions {
        println!(
            "{}  {}  {:>4} msgs  {}",
            session.id,
            session.updated_at.format("%Y-%m-%d %H:%M"),
            session.message_count,
            session.title.as_deref().unwrap_or("(untitled)"),
        );
    }
    Ok(())
}

pub async fn print_history(client: &HttpClient, session_id: &str) -> CommandResult {
    let messages = client.get_messages(session_id).await?;
    let mut stdout = io::stdout().lock();
    for message in &messages {
        render::print_message(&mut stdout, message)?;
    }
    Ok(())
}

pub async fn delete_session(client: &HttpClient, session_id: &str) -> CommandResult {
    client.delete_session(session_id).await?;
    println!("Deleted {session_id}.");
    Ok(())
}
