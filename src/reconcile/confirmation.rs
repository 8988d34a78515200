use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, BufRead, Write};
use tracing::info;

/// How a run decides whether to mutate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmMode {
    /// Plan and report only.
    DryRun,
    AutoConfirm,
    /// Ask a human.
    Interactive,
}

impl ConfirmMode {
    /// `--dry-run` wins over `--auto-confirm`.
    pub fn from_flags(dry_run: bool, auto_confirm: bool) -> Self {
        if dry_run {
            ConfirmMode::DryRun
        } else if auto_confirm {
            ConfirmMode::AutoConfirm
        } else {
            ConfirmMode::Interactive
        }
    }
}

impl fmt::Display for ConfirmMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfirmMode::DryRun => write!(f, "dry-run"),
            ConfirmMode::AutoConfirm => write!(f, "auto-confirm"),
            ConfirmMode::Interactive => write!(f, "interactive"),
        }
    }
}

/// Source of yes/no answers for interactive confirmation.
pub trait ConfirmationInput {
    /// Show `prompt` and return the raw answer. End of input is an empty answer.
    fn ask(&mut self, prompt: &str) -> io::Result<String>;
}

/// Prompts on stderr and reads one line from stdin.
#[derive(Debug, Default)]
pub struct StdinInput;

impl ConfirmationInput for StdinInput {
    fn ask(&mut self, prompt: &str) -> io::Result<String> {
        let mut stderr = io::stderr();
        write!(stderr, "{prompt} [y/N]: ")?;
        stderr.flush()?;

        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(line)
    }
}

/// Replays canned answers; runs dry once they are used up.
#[derive(Debug, Default, Clone)]
pub struct ScriptedInput {
    answers: Vec<String>,
    prompts: Vec<String>,
}

impl ScriptedInput {
    pub fn new<I>(answers: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let mut answers: Vec<String> = answers.into_iter().map(Into::into).collect();
        answers.reverse();
        Self {
            answers,
            prompts: Vec::new(),
        }
    }

    pub fn prompts(&self) -> &[String] {
        &self.prompts
    }
}

impl ConfirmationInput for ScriptedInput {
    fn ask(&mut self, prompt: &str) -> io::Result<String> {
        self.prompts.push(prompt.to_string());
        Ok(self.answers.pop().unwrap_or_default())
    }
}

pub struct ConfirmationGate<I: ConfirmationInput> {
    input: I,
}

impl<I: ConfirmationInput> ConfirmationGate<I> {
    pub fn new(input: I) -> Self {
        Self { input }
    }

    pub fn input(&self) -> &I {
        &self.input
    }

    /// `action` is the verb ("delete", "upsert"); `target` names the scope.
    pub fn should_proceed(
        &mut self,
        planned_count: usize,
        mode: ConfirmMode,
        action: &str,
        target: &str,
    ) -> io::Result<bool> {
        if planned_count == 0 {
            info!("Nothing to {action} in {target}");
            return Ok(false);
        }

        match mode {
            ConfirmMode::DryRun => {
                info!(planned_count, "Dry run: would {action} {planned_count} records in {target}");
                Ok(false)
            }
            ConfirmMode::AutoConfirm => Ok(true),
            ConfirmMode::Interactive => {
                let prompt = format!("About to {action} {planned_count} records in {target}. Proceed?");
                let answer = self.input.ask(&prompt)?;
                Ok(is_affirmative(&answer))
            }
        }
    }
}

pub fn is_affirmative(answer: &str) -> bool {
    let answer = answer.trim();
    answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes")
}
