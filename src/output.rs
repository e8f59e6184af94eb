//! Output sink: the seam between orchestration logic and the terminal,
//! so the orchestrators can be driven headlessly in tests.

use color_eyre::eyre::Result;
use dialoguer::{Confirm, Input};
use dialoguer::theme::ColorfulTheme;

/// Everything an orchestrator needs to report progress and collect
/// interactive decisions. `confirm`/`prompt` are the only methods allowed
/// to block on a human; everything else is fire-and-forget.
pub trait OutputSink: Send + Sync {
    fn phase(&self, name: &str);
    fn info(&self, message: &str);
    fn success(&self, message: &str);
    fn warning(&self, message: &str);
    fn error_with_recovery(&self, summary: &str, steps: &[String]);
    fn prompt(&self, question: &str) -> Result<String>;
    fn confirm(&self, question: &str, default: bool) -> Result<bool>;
    fn divider(&self);
}

/// Swallows everything, used by batch mode (which never prompts) and by
/// tests that don't care about terminal output.
pub struct NullOutput;

impl OutputSink for NullOutput {
    fn phase(&self, _name: &str) {}
    fn info(&self, _message: &str) {}
    fn success(&self, _message: &str) {}
    fn warning(&self, _message: &str) {}
    fn error_with_recovery(&self, _summary: &str, _steps: &[String]) {}

    fn prompt(&self, _question: &str) -> Result<String> {
        Ok(String::new())
    }

    fn confirm(&self, _question: &str, default: bool) -> Result<bool> {
        Ok(default)
    }

    fn divider(&self) {}
}

/// Prints to stdout/stderr and drives `dialoguer` prompts on a real TTY.
pub struct TerminalOutput {
    verbose: bool,
}

impl TerminalOutput {
    pub fn new(verbose: bool) -> Self {
        TerminalOutput { verbose }
    }
}

impl OutputSink for TerminalOutput {
    fn phase(&self, name: &str) {
        println!("\n== {name} ==");
    }

    fn info(&self, message: &str) {
        if self.verbose {
            println!("  {message}");
        }
    }

    fn success(&self, message: &str) {
        println!("  \u{2713} {message}");
    }

    fn warning(&self, message: &str) {
        eprintln!("  ! {message}");
    }

    fn error_with_recovery(&self, summary: &str, steps: &[String]) {
        eprintln!("  \u{2717} {summary}");
        for (i, step) in steps.iter().enumerate() {
            eprintln!("    {}. {step}", i + 1);
        }
    }

    fn prompt(&self, question: &str) -> Result<String> {
        let answer = Input::with_theme(&ColorfulTheme::default())
            .with_prompt(question)
            .interact_text()?;
        Ok(answer)
    }

    fn confirm(&self, question: &str, default: bool) -> Result<bool> {
        let answer = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(question)
            .default(default)
            .interact()?;
        Ok(answer)
    }

    fn divider(&self) {
        println!("{}", "-".repeat(60));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_output_confirm_returns_default() {
        let sink = NullOutput;
        assert!(sink.confirm("proceed?", true).unwrap());
        assert!(!sink.confirm("proceed?", false).unwrap());
    }

    #[test]
    fn null_output_prompt_returns_empty() {
        let sink = NullOutput;
        assert_eq!(sink.prompt("name?").unwrap(), "");
    }
}
