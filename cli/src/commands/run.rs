use std::io::{Read, Write};
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use clap::{ArgAction, Parser, ValueHint};
use rivet_emulator::runtime::devices::ConsoleInput;
use rivet_emulator::{Emulator, ExitStatus, MachineConfig};
use tracing::{debug, info, warn};

use crate::interactive::run_interactive;

/// Steps run between two flushes of the guest's output
const BATCH: u64 = 16 * 1024;

#[derive(Parser, Debug)]
pub struct RunOpt {
    /// Raw image, copied at the start of the RAM
    #[arg(value_hint = ValueHint::FilePath)]
    image: Utf8PathBuf,

    /// Disk image backing the virtio block device
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    disk: Option<Utf8PathBuf>,

    /// Size of the RAM, in MiB
    #[arg(short, long, default_value_t = 128)]
    memory: u64,

    /// Stop after this many steps
    #[arg(long)]
    max_steps: Option<u64>,

    /// Stop after this many seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Run the program in interactive mode. The serial console is fed with
    /// the `input` command instead of stdin, and the step and time limits
    /// are ignored.
    #[arg(short, long, action = ArgAction::SetTrue)]
    interactive: bool,
}

fn read(path: &Utf8Path) -> anyhow::Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("could not read {path}"))
}

/// Forward stdin to the serial console, byte by byte, until EOF
fn forward_stdin(input: ConsoleInput) {
    std::thread::spawn(move || {
        for byte in std::io::stdin().lock().bytes() {
            match byte {
                Ok(byte) => input.push(byte),
                Err(e) => {
                    warn!(error = &e as &dyn std::error::Error, "Could not read stdin");
                    break;
                }
            }
        }
        debug!("End of input");
    });
}

/// Run the machine in batches, printing its output in between
fn drive(emulator: &mut Emulator, max_steps: Option<u64>) -> anyhow::Result<ExitStatus> {
    let mut stdout = std::io::stdout().lock();
    let mut remaining = max_steps;

    loop {
        let batch = remaining.map_or(BATCH, |remaining| remaining.min(BATCH));
        let status = emulator.run_for(batch);

        let output = emulator.take_output();
        if !output.is_empty() {
            stdout.write_all(&output)?;
            stdout.flush()?;
        }

        match (status, remaining.as_mut()) {
            (ExitStatus::StepLimit, None) => {}
            (ExitStatus::StepLimit, Some(remaining)) => {
                *remaining -= batch;
                if *remaining == 0 {
                    return Ok(ExitStatus::StepLimit);
                }
            }
            (status, _) => return Ok(status),
        }
    }
}

impl RunOpt {
    pub fn exec(self) -> anyhow::Result<i32> {
        info!(path = %self.image, "Reading image");
        let image = read(&self.image)?;
        let disk = self.disk.as_deref().map(read).transpose()?;

        let config = MachineConfig {
            ram_size: self
                .memory
                .checked_mul(1024 * 1024)
                .context("memory size is too large")?,
            disk,
            ..MachineConfig::default()
        };

        debug!(ram_size = config.ram_size, "Building machine");
        let mut emulator = Emulator::new(config)?;
        emulator.load_image(&image)?;

        let status = if self.interactive {
            run_interactive(&mut emulator)?
        } else {
            if let Some(timeout) = self.timeout {
                let cancel = emulator.cancel_token();
                std::thread::spawn(move || {
                    std::thread::sleep(Duration::from_secs(timeout));
                    warn!(timeout, "Timeout reached");
                    cancel.store(true, Ordering::Relaxed);
                });
            }

            info!("Running image");
            forward_stdin(emulator.console_input());
            drive(&mut emulator, self.max_steps)?
        };

        let computer = emulator.computer();
        info!(?status, cycles = computer.cycles, "End of program");
        debug!("Registers:\n{}", computer.registers);

        Ok(status.code())
    }
}
