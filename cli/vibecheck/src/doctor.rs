//! `vibecheck doctor`: report which environment configuration is present,
//! without making any network calls or touching the database.

use console::style;

pub fn run() -> anyhow::Result<()> {
    println!("{}", style("VibeCheck environment").bold());
    check_with_default("DATABASE_URL", "vibecheck.db");
    check_with_default("CLONE_DIR", "/tmp/vibecheck-repos");
    check_secret("OPENAI_API_KEY", "lightweight scans run without a contextual LLM pass");
    check_secret("GEMINI_API_KEY", "robust scans fail immediately with GEMINI_API_KEY_MISSING");
    Ok(())
}

fn check_with_default(var: &str, default: &str) {
    match std::env::var(var) {
        Ok(value) => println!("  {} {var} = {value}", style("\u{2713}").green()),
        Err(_) => println!("  {} {var} not set, defaults to {default}", style("\u{b7}").dim()),
    }
}

fn check_secret(var: &str, absence_note: &str) {
    match std::env::var(var) {
        Ok(value) if !value.is_empty() => {
            println!("  {} {var} is set ({} chars)", style("\u{2713}").green(), value.len())
        }
        _ => println!("  {} {var} not set — {absence_note}", style("\u{2717}").yellow()),
    }
}
