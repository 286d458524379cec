use camino::Utf8PathBuf;
use clap::{Parser, ValueHint};
use rivet_emulator::constants::{Address, RAM_BASE};
use rivet_emulator::runtime::instructions::length;
use rivet_emulator::runtime::Instruction;
use tracing::info;

use crate::interactive::parse::parse_number;

#[derive(Parser, Debug)]
pub struct DisasmOpt {
    /// Raw image, as given to `run`
    #[arg(value_hint = ValueHint::FilePath)]
    image: Utf8PathBuf,

    /// Address of the first byte of the image
    #[arg(short, long, default_value_t = RAM_BASE, value_parser = parse_number)]
    base: Address,

    /// Number of instructions to show
    #[arg(short = 'n', long)]
    count: Option<usize>,
}

/// One decoded instruction of an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Line {
    pub address: Address,
    raw: u32,
    instruction: Option<Instruction>,
}

impl Line {
    /// Length of the instruction in bytes
    pub const fn size(&self) -> u64 {
        length(self.raw)
    }
}

impl std::fmt::Display for Line {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hex = if self.size() == 2 {
            format!("{:04x}", self.raw)
        } else {
            format!("{:08x}", self.raw)
        };

        write!(f, "{:#010x}:  {hex:<8}  ", self.address)?;
        match &self.instruction {
            Some(instruction) => write!(f, "{instruction}"),
            None => write!(f, "<illegal>"),
        }
    }
}

/// Decode `image` as if it was loaded at `base`. Stops at the first
/// incomplete instruction.
pub fn disassemble(image: &[u8], base: Address) -> impl Iterator<Item = Line> + '_ {
    let half = move |offset: usize| {
        image
            .get(offset..offset + 2)
            .map(|bytes| u32::from(bytes[0]) | (u32::from(bytes[1]) << 8))
    };

    let mut offset = 0;
    std::iter::from_fn(move || {
        let mut raw = half(offset)?;
        if length(raw) == 4 {
            raw |= half(offset + 2)? << 16;
        }

        let line = Line {
            address: base + offset as u64,
            raw,
            instruction: Instruction::decode_parcel(raw).ok().map(|(inst, _)| inst),
        };
        offset += line.size() as usize;
        Some(line)
    })
}

impl DisasmOpt {
    pub fn exec(self) -> anyhow::Result<()> {
        info!(path = %self.image, "Reading image");
        let image = std::fs::read(&self.image)?;

        let lines = disassemble(&image, self.base).take(self.count.unwrap_or(usize::MAX));
        for line in lines {
            println!("{line}");
        }

        Ok(())
    }
}
