use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Error, Result};

/// One line of stdin input for `pdfview open`.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplCommand {
    Next,
    Prev,
    GoTo(i64),
    Page,
    Count,
    /// `password` on its own clears it.
    Password(Option<String>),
    Source(String),
    Scale(f32),
    Detach,
    Attach,
    Quit,
}

impl FromStr for ReplCommand {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };
        let command = match word.to_ascii_lowercase().as_str() {
            "next" | "n" => ReplCommand::Next,
            "prev" | "p" => ReplCommand::Prev,
            "goto" | "g" => ReplCommand::GoTo(
                rest.parse::<i64>()
                    .with_context(|| format!("goto expects a page number, got `{rest}`"))?,
            ),
            "page" => ReplCommand::Page,
            "count" => ReplCommand::Count,
            "password" => ReplCommand::Password((!rest.is_empty()).then(|| rest.to_string())),
            "source" => {
                if rest.is_empty() {
                    bail!("source expects a value");
                }
                ReplCommand::Source(rest.to_string())
            }
            "scale" => ReplCommand::Scale(
                rest.parse::<f32>()
                    .with_context(|| format!("scale expects a number, got `{rest}`"))?,
            ),
            "detach" => ReplCommand::Detach,
            "attach" => ReplCommand::Attach,
            "quit" | "q" | "exit" => ReplCommand::Quit,
            "" => return Err(anyhow!("empty command")),
            other => bail!("unknown command `{other}`"),
        };
        Ok(command)
    }
}
