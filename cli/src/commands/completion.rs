use std::io::Write;

use anyhow::Context;
use camino::Utf8PathBuf;
use clap::{CommandFactory, Parser, ValueHint};
use clap_complete::Shell;
use tracing::info;

use crate::Opt;

#[derive(Parser, Debug)]
pub struct CompletionOpt {
    /// Shell to generate the script for. Guessed from `$SHELL` when missing.
    #[arg(value_enum)]
    shell: Option<Shell>,

    /// Write the script to a file instead of the standard output
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    output: Option<Utf8PathBuf>,
}

/// Write the completion script of the `rivet` command line for `shell`
fn generate(shell: Shell, out: &mut dyn Write) {
    let mut command = Opt::command();
    let name = command.get_name().to_owned();
    clap_complete::generate(shell, &mut command, name, out);
}

impl CompletionOpt {
    pub fn exec(&self) -> anyhow::Result<()> {
        let shell = self
            .shell
            .or_else(Shell::from_env)
            .context("could not guess the shell, pass it as an argument")?;

        match &self.output {
            Some(path) => {
                let mut file = std::fs::File::create(path)
                    .with_context(|| format!("could not create {path}"))?;
                generate(shell, &mut file);
                info!(%path, %shell, "Completions written");
            }
            None => generate(shell, &mut std::io::stdout()),
        }

        Ok(())
    }
}
