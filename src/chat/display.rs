use colored::*;
use comfy_table::{Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};

use super::types::SessionStats;
use crate::error::BackendError;
use crate::registry::LocalModel;
use crate::resolver::ScoredCandidate;

fn header(titles: &[&str]) -> Vec<Cell> {
    titles
        .iter()
        .map(|t| Cell::new(t).fg(Color::Cyan).add_attribute(Attribute::Bold))
        .collect()
}

fn new_table(titles: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .set_header(header(titles))
        .load_preset(comfy_table::presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn format_size(bytes: Option<u64>) -> String {
    match bytes {
        Some(b) if b >= 1024 * 1024 * 1024 => format!("{:.2} GB", b as f64 / (1024.0 * 1024.0 * 1024.0)),
        Some(b) => format!("{:.1} MB", b as f64 / (1024.0 * 1024.0)),
        None => "?".to_string(),
    }
}

/// Ranked catalog candidates, numbered from 1 for selection prompts.
pub fn display_candidates_table(candidates: &[ScoredCandidate]) {
    if candidates.is_empty() {
        println!("{}", "No candidates found".yellow());
        return;
    }

    let mut table = new_table(&["#", "Repository", "File", "Quant", "Size", "Score"]);
    for (i, scored) in candidates.iter().enumerate() {
        let c = &scored.candidate;
        table.add_row(vec![
            Cell::new(i + 1).fg(Color::White).set_alignment(CellAlignment::Center),
            Cell::new(&c.repo_id).fg(Color::Green),
            Cell::new(&c.filename).fg(Color::Yellow),
            Cell::new(c.quantization.as_ref().map(|q| q.as_str()).unwrap_or("-"))
                .fg(Color::Magenta)
                .set_alignment(CellAlignment::Center),
            Cell::new(format_size(c.size_bytes)).fg(Color::Blue).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.2}", scored.score)).fg(Color::White).set_alignment(CellAlignment::Right),
        ]);
    }

    println!("\n{}", table);
    println!("{}", format!("Total candidates: {}", candidates.len()).bright_green());
}

/// Models in the local models directory.
pub fn display_local_models(models: &[LocalModel]) {
    if models.is_empty() {
        println!("{}", "No local models. Try `llmpal download <query>`".yellow());
        return;
    }

    let mut table = new_table(&["", "Name", "Size", "Modified", "Checksum"]);
    for model in models {
        let marker = if model.is_active { "*" } else { "" };
        table.add_row(vec![
            Cell::new(marker).fg(Color::Green).set_alignment(CellAlignment::Center),
            Cell::new(&model.name).fg(if model.is_active { Color::Green } else { Color::White }),
            Cell::new(format_size(Some(model.size_bytes))).fg(Color::Blue).set_alignment(CellAlignment::Right),
            Cell::new(model.modified_at.format("%Y-%m-%d %H:%M:%S").to_string()).fg(Color::DarkGrey),
            Cell::new(model.checksum.as_deref().map(|c| &c[..c.len().min(12)]).unwrap_or("-")).fg(Color::DarkGrey),
        ]);
    }

    println!("\n{}", table);
    println!("{}", format!("Total models: {}", models.len()).bright_green());
}

pub fn display_backend_failures(failures: &[BackendError]) {
    for failure in failures {
        println!("{} {}", "warning:".yellow().bold(), failure);
    }
}

pub fn display_stats(stats: &SessionStats) {
    let secs = stats.duration.as_secs();
    println!("\n{}", "Session statistics".cyan().bold());
    println!("  Model:       {}", stats.model.cyan());
    println!(
        "  Duration:    {}",
        format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60).yellow()
    );
    println!("  Messages:    {}", stats.messages.to_string().green());
    println!("  Turns:       {}", stats.turns.to_string().green());
    println!(
        "  Tokens:      {} prompt / {} completion",
        stats.prompt_tokens.to_string().blue(),
        stats.completion_tokens.to_string().blue()
    );
    if let Some(turn) = stats.last_turn {
        println!(
            "  Last reply:  {} tokens, {:.1} tok/s, {:.1}s",
            turn.tokens,
            turn.tokens_per_second(),
            turn.duration.as_secs_f64()
        );
    }
    println!();
}
