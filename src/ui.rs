use colored::Colorize;
use declarative::ConvergenceResult;

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Status glyph for a convergence result
pub fn result_glyph(result: &ConvergenceResult) -> String {
    match result {
        ConvergenceResult::Unchanged => "○".dimmed().to_string(),
        ConvergenceResult::Changed => "✓".green().to_string(),
        ConvergenceResult::Failed { .. } => "✗".red().to_string(),
        ConvergenceResult::Skipped { .. } => "⊘".yellow().to_string(),
    }
}

/// One report line: glyph, resource, and the reason for failures and skips
pub fn result_line(id: &str, result: &ConvergenceResult) -> String {
    let glyph = result_glyph(result);
    match result {
        ConvergenceResult::Failed { reason } => format!("{glyph} {id} {}", reason.red()),
        ConvergenceResult::Skipped { reason } => format!("{glyph} {id} {}", reason.dimmed()),
        ConvergenceResult::Changed => format!("{glyph} {id} {}", "changed".green()),
        ConvergenceResult::Unchanged => format!("{glyph} {}", id.dimmed()),
    }
}
