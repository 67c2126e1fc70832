//! Terminal side of the orchestrators: phase progress, notices and prompts.

use platform_backup::{Operator, Phase};
use std::io::{self, BufRead, Write};

pub struct TerminalOperator;

impl Operator for TerminalOperator {
    fn phase(&self, phase: Phase) {
        println!(":: {}...", phase);
    }

    fn notice(&self, message: &str) {
        println!("\n{}\n", message);
    }

    fn confirm(&self, prompt: &str) -> bool {
        print!("{} [y/N] ", prompt);
        if io::stdout().flush().is_err() {
            return false;
        }

        tokio::task::block_in_place(|| read_answer(&mut io::stdin().lock()))
    }
}

/// Read one answer line. End of input or a read error declines.
fn read_answer(input: &mut impl BufRead) -> bool {
    let mut line = String::new();
    match input.read_line(&mut line) {
        Ok(0) | Err(_) => false,
        Ok(_) => is_yes(&line),
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Report a failed command. The error message already carries its phase and
/// any remediation commands.
pub fn failure(err: &anyhow::Error) {
    eprintln!("\nError: {}\n", err);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_explicit_yes_confirms() {
        assert!(is_yes("y\n"));
        assert!(is_yes(" YES "));
        assert!(!is_yes("\n"));
        assert!(!is_yes("no"));
        assert!(!is_yes("yep"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_answer_is_read_off_the_async_workers() {
        let answer = tokio::task::block_in_place(|| read_answer(&mut io::Cursor::new("yes\nno\n")));
        assert!(answer);
        assert!(!read_answer(&mut io::Cursor::new("")));
        assert!(!read_answer(&mut io::Cursor::new("n\n")));
    }
}
