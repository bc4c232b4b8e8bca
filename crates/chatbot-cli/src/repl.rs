use std::error::Error;
use std::io::{self, Write};
use std::sync::Arc;

use chatbot_core::{ChatController, ChatSettings, ChatStore, TurnHandle, TurnOutcome};
use chatbot_http::HttpClient;
use crossterm::style::Stylize;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::{commands, render};

const HELP: &str = "\
/clear   delete this session's messages
/new     start a new session
/stream  toggle streaming replies
/tools   toggle tool calls
/memory  toggle conversation memory
/config  show backend settings
/debug   show session state, client settings and backend settings
/quit    exit";

enum Flow {
    Continue,
    Quit,
}

pub async fn run(
    client: HttpClient,
    settings: ChatSettings,
    resume: Option<String>,
) -> Result<(), Box<dyn Error>> {
    let mut controller =
        ChatController::new(Arc::new(client.clone()), ChatStore::shared()).with_settings(settings);

    match resume {
        Some(session_id) => resume_session(&client, &controller, &session_id).await?,
        None => new_session(&client, &controller).await?,
    }
    print_banner(&controller);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{} ", ">".bold());
        io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            println!();
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('/') {
            match run_command(&client, &mut controller, command).await {
                Ok(Flow::Quit) => break,
                Ok(Flow::Continue) => {}
                Err(err) => notify(&err.to_string()),
            }
            continue;
        }

        match controller.send_message(line) {
            Ok(turn) => drive_turn(&client, &controller, turn).await?,
            Err(err) => notify(&err.to_string()),
        }
    }

    Ok(())
}

async fn new_session(
    client: &HttpClient,
    controller: &ChatController,
) -> Result<(), chatbot_api::Error> {
    let session = client.create_session(None).await?;
    tracing::info!(session_id = %session.id, "created session");
    controller.open_session(session.id, Vec::new());
    Ok(())
}

async fn resume_session(
    client: &HttpClient,
    controller: &ChatController,
    session_id: &str,
) -> Result<(), Box<dyn Error>> {
    let session = client.get_session(session_id).await?;
    let history = client.get_messages(&session.id).await?;

    let mut stdout = io::stdout().lock();
    for message in &history {
        render::print_message(&mut stdout, message)?;
    }
    controller.open_session(session.id, history);
    Ok(())
}

fn print_banner(controller: &ChatController) {
    let session_id = controller
        .store()
        .lock()
        .session_id()
        .unwrap_or_default()
        .to_string();
    let settings = controller.settings();
    println!(
        "{}",
        format!(
            "session {session_id} | streaming {} | tools {} | memory {} | /help for commands",
            on_off(settings.streaming),
            on_off(settings.options.enable_tool_calls),
            on_off(settings.options.enable_memory),
        )
        .dim()
    );
}

/// Render the reply as it arrives. Ctrl-C stops it locally and asks the
/// server to stop the agent too.
async fn drive_turn(
    client: &HttpClient,
    controller: &ChatController,
    mut turn: TurnHandle,
) -> io::Result<()> {
    let mut revisions = controller.subscribe();
    let mut printer = render::TranscriptPrinter::default();
    let mut stdout = io::stdout();

    let outcome = loop {
        tokio::select! {
            outcome = turn.wait() => break outcome,
            changed = revisions.changed() => {
                if changed.is_err() {
                    break turn.wait().await;
                }
                render_tail(controller, &mut printer, &mut stdout)?;
            }
            _ = tokio::signal::ctrl_c() => {
                turn.cancel();
                cancel_on_server(client, controller);
            }
        }
    };

    render_tail(controller, &mut printer, &mut stdout)?;
    printer.finish(&mut stdout)?;

    match outcome {
        TurnOutcome::Completed => {}
        TurnOutcome::Cancelled => notify("reply cancelled"),
        TurnOutcome::Failed(message) => notify(&format!("reply failed: {message}")),
    }
    Ok(())
}

fn render_tail(
    controller: &ChatController,
    printer: &mut render::TranscriptPrinter,
    out: &mut impl Write,
) -> io::Result<()> {
    let store = controller.store().lock();
    match store.last_assistant() {
        Some(message) => printer.update(out, message),
        None => Ok(()),
    }
}

fn cancel_on_server(client: &HttpClient, controller: &ChatController) {
    let Some(session_id) = controller.store().lock().session_id().map(str::to_string) else {
        return;
    };
    let client = client.clone();
    tokio::spawn(async move {
        match client.cancel_session(&session_id).await {
            Ok(outcome) if !outcome.success => {
                tracing::warn!(%session_id, message = %outcome.message, "server did not cancel")
            }
            Ok(_) => {}
            Err(err) => tracing::warn!(%session_id, %err, "cancel request failed"),
        }
    });
}

async fn run_command(
    client: &HttpClient,
    controller: &mut ChatController,
    command: &str,
) -> Result<Flow, Box<dyn Error>> {
    match command.trim() {
        "quit" | "exit" | "q" => return Ok(Flow::Quit),
        "help" => println!("{HELP}"),
        "clear" => {
            let session_id = controller.store().lock().session_id().map(str::to_string);
            if let Some(session_id) = session_id {
                let outcome = client.clear_session(&session_id).await?;
                tracing::debug!(deleted = outcome.deleted_count, "cleared session");
            }
            controller.clear_messages();
            notify("messages cleared");
        }
        "new" => {
            new_session(client, controller).await?;
            print_banner(controller);
        }
        "stream" => {
            let settings = controller.settings_mut();
            settings.streaming = !settings.streaming;
            notify(&format!("streaming {}", on_off(settings.streaming)));
        }
        "tools" => {
            let options = &mut controller.settings_mut().options;
            options.enable_tool_calls = !options.enable_tool_calls;
            notify(&format!("tool calls {}", on_off(options.enable_tool_calls)));
        }
        "memory" => {
            let options = &mut controller.settings_mut().options;
            options.enable_memory = !options.enable_memory;
            notify(&format!("memory {}", on_off(options.enable_memory)));
        }
        "config" => commands::print_config(client).await?,
        "debug" => {
            let report = debug_report(
                &controller.store().lock(),
                controller.settings(),
                client.base_url().as_str(),
                client.user_id(),
            );
            println!("{}", report.dim());
            commands::print_config(client).await?;
        }
        other => notify(&format!("unknown command /{other}, try /help")),
    }
    Ok(Flow::Continue)
}

fn debug_report(
    store: &ChatStore,
    settings: &ChatSettings,
    base_url: &str,
    user_id: &str,
) -> String {
    let flush_ms = settings.flush_interval.as_millis();
    [
        format!("session:   {}", store.session_id().unwrap_or("(none)")),
        format!("user:      {user_id}"),
        format!("backend:   {base_url}"),
        format!(
            "settings:  streaming {} | tools {} | memory {} | flush {flush_ms} ms",
            on_off(settings.streaming),
            on_off(settings.options.enable_tool_calls),
            on_off(settings.options.enable_memory),
        ),
        format!(
            "store:     {} messages | loading {} | revision {} | epoch {}",
            store.messages().len(),
            on_off(store.is_loading()),
            store.revision(),
            store.epoch(),
        ),
    ]
    .join("\n")
}

fn on_off(enabled: bool) -> &'static str {
    if enabled { "on" } else { "off" }
}

fn notify(message: &str) {
    eprintln!("{} {}", "!".yellow().bold(), message);
}
