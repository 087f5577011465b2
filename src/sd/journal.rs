use crate::sd::config::Scope;
use std::process::Command;

/// Tail of a unit's journal, oldest line first.
pub trait JournalReader: Send + Sync {
    fn tail(&self, unit: &str, lines: usize) -> anyhow::Result<Vec<String>>;
}

/// `JournalReader` that shells out to `journalctl`.
#[derive(Debug, Clone)]
pub struct Journalctl {
    scope: Scope,
}

impl Journalctl {
    pub fn new(scope: Scope) -> Self {
        Self { scope }
    }

    fn command(&self, unit: &str, lines: usize) -> Command {
        let mut cmd = Command::new("journalctl");
        match self.scope {
            Scope::System => cmd.arg("--unit").arg(unit),
            Scope::User => cmd.arg("--user-unit").arg(unit),
        };
        cmd.arg("--lines")
            .arg(lines.to_string())
            .arg("--no-pager")
            .arg("--quiet")
            .arg("--output=short-iso");
        cmd
    }
}

impl JournalReader for Journalctl {
    fn tail(&self, unit: &str, lines: usize) -> anyhow::Result<Vec<String>> {
        // journalctl treats `-n 0` as "no limit" on some versions.
        if lines == 0 {
            return Ok(vec![]);
        }
        let out = self
            .command(unit, lines)
            .output()
            .map_err(|e| anyhow::anyhow!("failed to run journalctl: {e}"))?;
        if !out.status.success() {
            let err = String::from_utf8_lossy(&out.stderr).trim().to_string();
            anyhow::bail!(
                "journalctl -u {unit} failed: {}",
                if err.is_empty() { out.status.to_string() } else { err }
            );
        }
        Ok(String::from_utf8_lossy(&out.stdout)
            .lines()
            .map(str::to_string)
            .collect())
    }
}
