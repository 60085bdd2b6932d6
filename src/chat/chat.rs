use std::io::{stdout, Write};

use anyhow::Result;
use colored::*;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing::{info, warn};

use super::display::display_stats;
use super::session::ChatSession;

fn print_help() {
    println!("\n{}", "Chat Commands".cyan());
    println!("{}", "=".repeat(60).bright_cyan());
    println!("{}       - Clear conversation history", "/clear".green());
    println!("{}       - Show session statistics", "/stats".green());
    println!("{}        - Show this help message", "/help".green());
    println!("{}        - Exit the chat", "/quit".green());
    println!("{} - Exit the chat", "quit, exit, bye".green());
    println!("Ctrl-C while a reply streams cancels it; Ctrl-C or Ctrl-D at the prompt exits.");
    println!();
}

/// What the loop should do with a line of input.
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Empty,
    Help,
    Clear,
    Stats,
    Quit,
    Unknown(&'a str),
    Message(&'a str),
}

fn classify(line: &str) -> Input<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let lower = line.to_lowercase();
    if matches!(lower.as_str(), "quit" | "exit" | "bye") {
        return Input::Quit;
    }
    if line.starts_with('/') {
        return match lower.as_str() {
            "/help" => Input::Help,
            "/clear" => Input::Clear,
            "/stats" => Input::Stats,
            "/quit" | "/exit" => Input::Quit,
            _ => Input::Unknown(line),
        };
    }
    Input::Message(line)
}

/// Interactive loop over an open session.
pub async fn chat_loop(session: &mut ChatSession) -> Result<()> {
    println!(
        "\n{} {}",
        "Chatting with".bold(),
        session.model().bright_cyan().bold()
    );
    println!("{}", "Type /help for commands".dimmed());

    let mut rl = DefaultEditor::new()?;

    loop {
        let line = match rl.readline(&format!("{} ", "you >".green().bold())) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };

        match classify(&line) {
            Input::Empty => continue,
            Input::Help => print_help(),
            Input::Clear => {
                session.clear_history();
                println!("{}", "Conversation history cleared".green());
            }
            Input::Stats => display_stats(&session.stats()),
            Input::Quit => break,
            Input::Unknown(cmd) => {
                println!("{} {}", "Unknown command:".red(), cmd);
                println!("{}", "Type /help for available commands".dimmed());
            }
            Input::Message(text) => {
                let _ = rl.add_history_entry(text);
                stream_reply(session, text).await?;
            }
        }
    }

    println!("Goodbye!");
    info!("Chat session {} ended", session.id());
    Ok(())
}

async fn stream_reply(session: &mut ChatSession, text: &str) -> Result<()> {
    let mut turn = session.send(text)?;
    print!("\n{} ", "assistant >".blue().bold());
    stdout().flush()?;

    let mut cancelled = false;
    let mut failed = false;
    loop {
        tokio::select! {
            fragment = turn.next() => match fragment {
                Some(Ok(text)) => {
                    print!("{}", text);
                    stdout().flush()?;
                }
                Some(Err(e)) => {
                    warn!("Reply failed: {}", e);
                    println!("\n{} {}", "error:".red().bold(), e);
                    failed = true;
                    break;
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                cancelled = true;
                break;
            }
        }
    }

    if cancelled {
        turn.cancel();
        println!("\n{}", "[reply cancelled]".yellow());
    } else {
        drop(turn);
        println!();
        if let Some(last) = session.stats().last_turn.filter(|_| !failed) {
            println!(
                "{}",
                format!(
                    "({} tokens, {:.1} tok/s, {:.1}s)",
                    last.tokens,
                    last.tokens_per_second(),
                    last.duration.as_secs_f64()
                )
                .dimmed()
            );
        }
    }
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_are_recognized() {
        assert_eq!(classify("  "), Input::Empty);
        assert_eq!(classify("/HELP"), Input::Help);
        assert_eq!(classify("/clear"), Input::Clear);
        assert_eq!(classify("/stats"), Input::Stats);
        assert_eq!(classify("Bye"), Input::Quit);
        assert_eq!(classify("/quit"), Input::Quit);
        assert_eq!(classify("/frobnicate"), Input::Unknown("/frobnicate"));
        assert_eq!(classify(" hello there "), Input::Message("hello there"));
    }
}
