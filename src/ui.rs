//! Terminal output helpers

use colored::*;
use terminal_size::{terminal_size, Height, Width};

/// Banner shown when a session starts.
pub fn print_header(model: &str, media_dir: &str) {
    let (width, _) = terminal_size().unwrap_or((Width(80), Height(24)));
    let line = "─".repeat(width.0 as usize);
    println!("{}", line.black().bold());

    let name = "mediagram".yellow().bold();
    let version = format!("v{}", env!("CARGO_PKG_VERSION")).black().bold();
    println!("  🎞  {} {}", name, version);
    println!("{}", format!("  {}  •  {}", model, media_dir).cyan());
    println!("  {}", "/help lists commands, /quit exits".black().bold());

    println!("{}", line.black().bold());
}

pub fn print_step(msg: &str) {
    println!("  {} {}", "•".green(), msg);
}

pub fn print_success(msg: &str) {
    println!("  {} {}", "✓".green().bold(), msg.green());
}

pub fn print_warning(msg: &str) {
    println!("  {} {}", "⚠️ ".yellow().bold(), msg.yellow());
}

pub fn print_error(msg: &str) {
    println!("  {} {}", "❌".red().bold(), msg.red());
}

pub fn print_thinking(msg: &str) {
    println!("  {} {}...", "∴".magenta(), msg);
}
