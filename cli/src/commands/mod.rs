use clap::Parser;

mod completion;
pub(crate) mod disasm;
mod run;

#[derive(Parser, Debug)]
pub enum Subcommand {
    /// Boot a raw image and run it until it halts
    Run(self::run::RunOpt),

    /// Disassemble a raw image
    Disasm(self::disasm::DisasmOpt),

    /// Generate shell completions
    Completion(self::completion::CompletionOpt),
}

impl Subcommand {
    /// Run a subcommand, returning the process exit code
    pub fn exec(self) -> anyhow::Result<i32> {
        match self {
            Self::Run(opt) => opt.exec(),
            Self::Disasm(opt) => opt.exec().map(|()| 0),
            Self::Completion(opt) => opt.exec().map(|()| 0),
        }
    }
}
