//! `keyward completions` — print a shell completion script to stdout.
//!
//!   keyward completions zsh > ~/.zfunc/_keyward

use std::io;

use clap::CommandFactory;
use clap_complete::{generate, Shell};

use crate::cli::Cli;
use crate::errors::Result;

pub fn execute(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    let bin = cmd.get_name().to_string();
    generate(shell, &mut cmd, bin, &mut io::stdout().lock());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_mentions_every_subcommand() {
        let mut cmd = Cli::command();
        let mut buf = Vec::new();
        generate(Shell::Bash, &mut cmd, "keyward", &mut buf);
        let script = String::from_utf8(buf).unwrap();
        for sub in ["reveal", "approve", "rotation-due"] {
            assert!(script.contains(sub), "missing {sub}");
        }
    }
}
