use crate::common::config::GateConfig;
use crate::common::error::Result;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal;
use sha2::{Digest, Sha256};
use std::io::{self, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    Authenticated,
    Denied,
}

/// Source of password entries. `None` means the operator cancelled.
pub trait PasswordPrompt {
    fn read_password(&mut self, attempt: u32, max_attempts: u32) -> Result<Option<String>>;
}

/// Bounded-attempt password challenge run once at process start.
///
/// The expected secret is held as a SHA-256 hex digest; entries are digested
/// before comparison so the plaintext never leaves the prompt.
pub struct AuthenticationGate {
    expected_digest: String,
    max_attempts: u32,
}

impl AuthenticationGate {
    pub fn new(expected_digest: impl Into<String>, max_attempts: u32) -> Self {
        Self { expected_digest: expected_digest.into(), max_attempts }
    }

    pub fn from_config(config: &GateConfig) -> Self {
        Self::new(config.password_sha256.clone(), config.max_attempts)
    }

    /// Up to `max_attempts` entries; a match short-circuits to Authenticated,
    /// an empty or cancelled entry aborts early as Denied.
    pub fn challenge(&self, prompt: &mut dyn PasswordPrompt) -> Result<GateOutcome> {
        for attempt in 1..=self.max_attempts {
            let entry = match prompt.read_password(attempt, self.max_attempts)? {
                Some(entry) if !entry.is_empty() => entry,
                _ => {
                    tracing::info!("Authentication cancelled");
                    return Ok(GateOutcome::Denied);
                }
            };

            if self.digest_matches(&entry) {
                tracing::info!("Access granted");
                return Ok(GateOutcome::Authenticated);
            }
            tracing::warn!("Incorrect password ({}/{})", attempt, self.max_attempts);
        }

        tracing::warn!("Too many failed attempts");
        Ok(GateOutcome::Denied)
    }

    fn digest_matches(&self, entry: &str) -> bool {
        let digest = Sha256::digest(entry.as_bytes());
        let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        hex.eq_ignore_ascii_case(&self.expected_digest)
    }
}

/// Masked terminal entry: characters echo as `*`, Esc cancels.
pub struct TerminalPrompt;

impl PasswordPrompt for TerminalPrompt {
    fn read_password(&mut self, attempt: u32, max_attempts: u32) -> Result<Option<String>> {
        if attempt > 1 {
            println!("Incorrect password ({} of {} attempts).", attempt - 1, max_attempts);
        }
        print!("Enter password: ");
        io::stdout().flush()?;

        terminal::enable_raw_mode()?;
        let entry = read_masked();
        terminal::disable_raw_mode()?;
        println!();

        entry
    }
}

fn read_masked() -> Result<Option<String>> {
    let mut entry = String::new();
    loop {
        if let Event::Key(KeyEvent { code, modifiers, .. }) = event::read()? {
            match code {
                KeyCode::Enter => return Ok(Some(entry)),
                KeyCode::Esc => return Ok(None),
                KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => {
                    return Ok(None);
                }
                KeyCode::Backspace => {
                    if entry.pop().is_some() {
                        print!("\u{8} \u{8}");
                        io::stdout().flush()?;
                    }
                }
                KeyCode::Char(c) => {
                    entry.push(c);
                    print!("*");
                    io::stdout().flush()?;
                }
                _ => {}
            }
        }
    }
}
