use std::io::{self, Write};

use chatbot_api::{Message, Role, ToolStatus, ToolStep};
use crossterm::style::Stylize;

const TOOL_OUTPUT_MAX_CHARS: usize = 200;

/// Incrementally prints the trailing assistant message of a turn.
///
/// The store is re-read on every revision; the printer remembers how much of
/// the message it already wrote and only emits what is new.
#[derive(Default)]
pub struct TranscriptPrinter {
    message_id: Option<i64>,
    text_len: usize,
    thought: String,
    steps: Vec<ToolStatus>,
    mid_line: bool,
}

impl TranscriptPrinter {
    pub fn update(&mut self, out: &mut impl Write, message: &Message) -> io::Result<()> {
        if self.message_id != Some(message.id) {
            // A non-streaming reply swaps the placeholder for the stored row.
            let mid_line = self.mid_line;
            *self = Self {
                message_id: Some(message.id),
                mid_line,
                ..Self::default()
            };
        }

        if let Some(thought) = message.thought.as_deref()
            && !thought.is_empty()
            && thought != self.thought
        {
            self.end_line(out)?;
            writeln!(out, "{}", format!("thinking: {thought}").dim().italic())?;
            self.thought = thought.to_string();
        }

        for (index, step) in message.tool_steps.iter().enumerate() {
            match self.steps.get(index).copied() {
                None => {
                    self.end_line(out)?;
                    writeln!(out, "{}", tool_call_line(step).cyan())?;
                    if step.status.is_terminal() {
                        writeln!(out, "{}", tool_result_line(step))?;
                    }
                    self.steps.push(step.status);
                }
                Some(seen) if !seen.is_terminal() && step.status.is_terminal() => {
                    self.end_line(out)?;
                    writeln!(out, "{}", tool_result_line(step))?;
                    self.steps[index] = step.status;
                }
                Some(_) => {}
            }
        }

        let text = message.text();
        if text.len() < self.text_len {
            self.text_len = 0;
        }
        if text.len() > self.text_len {
            let delta = &text[self.text_len..];
            write!(out, "{delta}")?;
            self.text_len = text.len();
            self.mid_line = !delta.ends_with('\n');
        }

        out.flush()
    }

    /// Terminates the current line so the next prompt starts clean.
    pub fn finish(&mut self, out: &mut impl Write) -> io::Result<()> {
        self.end_line(out)?;
        out.flush()
    }

    fn end_line(&mut self, out: &mut impl Write) -> io::Result<()> {
        if self.mid_line {
            writeln!(out)?;
            self.mid_line = false;
        }
        Ok(())
    }
}

/// Prints a stored message, as shown when resuming a session.
pub fn print_message(out: &mut impl Write, message: &Message) -> io::Result<()> {
    let label = match message.role {
        Role::User => "you".bold().green(),
        Role::Assistant => "assistant".bold().blue(),
        Role::System => "system".bold().dark_grey(),
        Role::Tool => "tool".bold().cyan(),
    };
    writeln!(out, "{label}")?;

    if let Some(thought) = message.thought.as_deref().filter(|t| !t.is_empty()) {
        let took = message
            .thought_duration_ms
            .map(|ms| format!(" ({:.1}s)", ms as f64 / 1000.0))
            .unwrap_or_default();
        writeln!(out, "{}", format!("thinking{took}: {thought}").dim().italic())?;
    }
    for step in &message.tool_steps {
        writeln!(out, "{}", tool_call_line(step).cyan())?;
        if step.status.is_terminal() {
            writeln!(out, "{}", tool_result_line(step))?;
        }
    }

    let text = message.text();
    if !text.is_empty() {
        writeln!(out, "{text}")?;
    }
    writeln!(out)
}

fn tool_call_line(step: &ToolStep) -> String {
    let input = serde_json::to_string(&step.tool_input).unwrap_or_default();
    format!("> {}({})", step.tool_name, truncate_with_ellipsis(&input, TOOL_OUTPUT_MAX_CHARS))
}

fn tool_result_line(step: &ToolStep) -> String {
    let took = step.duration_ms.map(|ms| format!(" [{ms} ms]")).unwrap_or_default();
    match step.status {
        ToolStatus::Failed => {
            let error = step.tool_error.as_deref().unwrap_or("failed");
            format!(
                "  {} {}{took}",
                "x".red(),
                truncate_with_ellipsis(error, TOOL_OUTPUT_MAX_CHARS)
            )
        }
        _ => {
            let output = step.tool_output.as_deref().unwrap_or_default();
            format!(
                "  {} {}{took}",
                "=".green(),
                truncate_with_ellipsis(output.trim(), TOOL_OUTPUT_MAX_CHARS)
            )
        }
    }
}

fn truncate_with_ellipsis(input: &str, max_chars: usize) -> String {
    let single_line = input.split_whitespace().collect::<Vec<_>>().join(" ");
    if single_line.chars().count() <= max_chars {
        return single_line;
    }

    let mut truncated = single_line.chars().take(max_chars).collect::<String>();
    truncated.push('…');
    truncated
}
