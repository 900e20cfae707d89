//! Operator prompts.
//!
//! [`Terminal`] asks on an interactive terminal with hidden secret
//! input. [`Console`] reads plain lines from any reader/writer
//! pair, for piped input. Both re-ask until a numeric answer is
//! valid. [`Unattended`] answers every prompt with its default, for
//! `--non-interactive` runs.

use std::io::{BufRead, Write};
use std::ops::RangeInclusive;

use dialoguer::{Confirm, Input, Password, Select};

use crate::digits;
use crate::error::{DeployError, DeployResult};

pub trait Prompter {
    /// Free text. Empty input yields the default, or an empty
    /// string when there is none.
    fn text(&mut self, label: &str, default: Option<&str>) -> DeployResult<String>;

    /// A secret. Empty input yields an empty string.
    fn secret(&mut self, label: &str) -> DeployResult<String>;

    fn confirm(&mut self, label: &str, default: bool) -> DeployResult<bool>;

    /// An integer within `range`, re-asked until valid.
    fn number(
        &mut self,
        label: &str,
        range: RangeInclusive<u64>,
        default: Option<u64>,
    ) -> DeployResult<u64>;

    /// Index of one of `options`.
    fn choose(&mut self, label: &str, options: &[&str], default: usize) -> DeployResult<usize>;

    /// Whether a human can answer follow-up questions.
    fn is_interactive(&self) -> bool;
}

/// Prompts on the controlling terminal.
#[derive(Debug, Default)]
pub struct Terminal;

impl Prompter for Terminal {
    fn text(&mut self, label: &str, default: Option<&str>) -> DeployResult<String> {
        let mut input = Input::<String>::new().with_prompt(label).allow_empty(true);
        if let Some(d) = default.filter(|d| !d.is_empty()) {
            input = input.default(d.to_string());
        }
        Ok(input.interact_text()?.trim().to_string())
    }

    fn secret(&mut self, label: &str) -> DeployResult<String> {
        Ok(Password::new()
            .with_prompt(label)
            .allow_empty_password(true)
            .interact()?)
    }

    fn confirm(&mut self, label: &str, default: bool) -> DeployResult<bool> {
        Ok(Confirm::new().with_prompt(label).default(default).interact()?)
    }

    fn number(
        &mut self,
        label: &str,
        range: RangeInclusive<u64>,
        default: Option<u64>,
    ) -> DeployResult<u64> {
        let check = range.clone();
        let mut input = Input::<String>::new()
            .with_prompt(label)
            .validate_with(move |answer: &String| -> Result<(), String> {
                digits::parse_in_range(answer, &check)
                    .map(drop)
                    .map_err(|e| e.to_string())
            });
        if let Some(d) = default {
            input = input.default(d.to_string());
        }
        let answer = input.interact_text()?;
        digits::parse_in_range(&answer, &range)
    }

    fn choose(&mut self, label: &str, options: &[&str], default: usize) -> DeployResult<usize> {
        Ok(Select::new()
            .with_prompt(label)
            .items(options)
            .default(default)
            .interact()?)
    }

    fn is_interactive(&self) -> bool {
        true
    }
}

/// Prompts on a reader/writer pair, typically stdin/stderr.
pub struct Console<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Console<R, W> {
    pub const fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn ask(&mut self, prompt: &str) -> DeployResult<String> {
        write!(self.output, "{prompt}")?;
        self.output.flush()?;

        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Err(DeployError::InvalidInput("input closed".into()));
        }
        Ok(line.trim().to_string())
    }
}

impl Console<std::io::StdinLock<'static>, std::io::Stderr> {
    #[must_use]
    pub fn stdio() -> Self {
        Self::new(std::io::stdin().lock(), std::io::stderr())
    }
}

fn with_default(label: &str, default: Option<&str>) -> String {
    match default {
        Some(d) if !d.is_empty() => format!("{label} [{d}]: "),
        _ => format!("{label}: "),
    }
}

impl<R: BufRead, W: Write> Prompter for Console<R, W> {
    fn text(&mut self, label: &str, default: Option<&str>) -> DeployResult<String> {
        let answer = self.ask(&with_default(label, default))?;
        if answer.is_empty() {
            Ok(default.unwrap_or_default().to_string())
        } else {
            Ok(answer)
        }
    }

    fn secret(&mut self, label: &str) -> DeployResult<String> {
        self.ask(&format!("{label}: "))
    }

    fn confirm(&mut self, label: &str, default: bool) -> DeployResult<bool> {
        let hint = if default { "Y/n" } else { "y/N" };
        loop {
            let answer = self.ask(&format!("{label} [{hint}]: "))?;
            match answer.to_ascii_lowercase().as_str() {
                "" => return Ok(default),
                "y" | "yes" => return Ok(true),
                "n" | "no" => return Ok(false),
                _ => writeln!(self.output, "Please answer y or n.")?,
            }
        }
    }

    fn number(
        &mut self,
        label: &str,
        range: RangeInclusive<u64>,
        default: Option<u64>,
    ) -> DeployResult<u64> {
        let default_text = default.map(|d| d.to_string());
        let prompt = with_default(label, default_text.as_deref());

        loop {
            let answer = self.ask(&prompt)?;
            if answer.is_empty() {
                if let Some(d) = default {
                    return Ok(d);
                }
            }
            match digits::parse_in_range(&answer, &range) {
                Ok(value) => return Ok(value),
                Err(e) => writeln!(self.output, "{e}")?,
            }
        }
    }

    fn choose(&mut self, label: &str, options: &[&str], default: usize) -> DeployResult<usize> {
        writeln!(self.output, "{label}")?;
        for (i, option) in options.iter().enumerate() {
            writeln!(self.output, "  {}) {option}", i + 1)?;
        }
        let count = u64::try_from(options.len()).unwrap_or(u64::MAX);
        let default = u64::try_from(default + 1).ok();
        let picked = self.number("Choice", 1..=count, default)?;
        usize::try_from(picked - 1)
            .map_err(|_| DeployError::InvalidInput(format!("choice {picked} is out of range")))
    }

    fn is_interactive(&self) -> bool {
        true
    }
}

/// Answers every prompt with its default. A prompt without a
/// default gets an empty answer, which required-field validation
/// then rejects.
#[derive(Debug, Default)]
pub struct Unattended;

impl Prompter for Unattended {
    fn text(&mut self, _label: &str, default: Option<&str>) -> DeployResult<String> {
        Ok(default.unwrap_or_default().to_string())
    }

    fn secret(&mut self, _label: &str) -> DeployResult<String> {
        Ok(String::new())
    }

    fn confirm(&mut self, _label: &str, default: bool) -> DeployResult<bool> {
        Ok(default)
    }

    fn number(
        &mut self,
        label: &str,
        range: RangeInclusive<u64>,
        default: Option<u64>,
    ) -> DeployResult<u64> {
        let value = default.ok_or_else(|| DeployError::required(label))?;
        if range.contains(&value) {
            Ok(value)
        } else {
            Err(DeployError::InvalidInput(format!(
                "{label}: default {value} is outside {}..={}",
                range.start(),
                range.end()
            )))
        }
    }

    fn choose(&mut self, _label: &str, _options: &[&str], default: usize) -> DeployResult<usize> {
        Ok(default)
    }

    fn is_interactive(&self) -> bool {
        false
    }
}
