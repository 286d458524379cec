//! This module implements the TTY interactive interface.
//!
//! It is mainly based on two crates:
//!   - rustyline, to handle the line-editting logic
//!   - clap, to handle the parsing of those interactive commands
//!
//! Using Parser to do this is a bit of a hack, and requires some weird options
//! to have it working but works nonetheless.

use std::collections::BTreeSet;
use std::io::Write;

use clap::Parser;
use rivet_emulator::constants::{Address, Word};
use rivet_emulator::runtime::{AccessType, Computer, Csr, Reg, Width};
use rivet_emulator::{Emulator, ExitStatus};
use rustyline::history::DefaultHistory;
use rustyline::{Behavior, CompletionType, Config, EditMode, Editor};
use tracing::{debug, info, warn};

use crate::commands::disasm::disassemble;

mod helper;
pub mod parse;
use self::helper::RunHelper;

static HELP: &str = r#"
Run "help [command]" for command-specific help.
An empty line re-runs the last valid command."#;

/// Steps between two flushes of the guest's output while continuing
const FLUSH_INTERVAL: u64 = 4096;

#[derive(Parser, Clone, Debug)]
#[command(
    help_template = "{about}\n\nCOMMANDS:\n{subcommands}\n{after-help}",
    after_help = HELP,
    disable_version_flag = true,
    infer_subcommands = true,
    no_binary_name = true,
    allow_negative_numbers = true,
)]
/// Interactive mode commands
enum Command {
    /// Execute the next instructions
    #[command(alias = "s")]
    Step {
        /// Number of steps to execute
        #[arg(default_value = "1")]
        number: u64,
    },

    /// Continue the program until the next breakpoint or halt
    #[command(alias = "c")]
    Continue,

    /// Show the state of registers
    Registers { register: Option<Reg> },

    /// Show a control and status register
    Csr {
        /// Name or number of the register
        csr: Csr,
    },

    /// Show doublewords in memory
    Memory {
        /// The address to show, like `0x80000000` or `sp + 16`. It goes
        /// through the MMU like a load from the current privilege level.
        address: parse::Expression,

        /// Number of doublewords to show
        #[arg(default_value = "1")]
        number: u64,
    },

    /// Set a register, the PC or a doubleword in memory
    Set {
        /// `pc`, a register or `[address]`
        target: parse::AssignmentTarget,

        /// The value to set
        #[arg(allow_negative_numbers = true)]
        value: parse::Expression,
    },

    /// Show the next few instructions
    List {
        /// Number of instructions to show
        #[arg(default_value = "10")]
        number: usize,
    },

    /// Set a breakpoint
    Break {
        /// The address where to set the breakpoint
        address: parse::Expression,
    },

    /// Remove a breakpoint
    Unbreak {
        /// The address of the breakpoint to remove
        address: parse::Expression,
    },

    /// Send a line to the serial console
    Input {
        /// Text to send, followed by a newline
        text: Vec<String>,

        /// Do not send the trailing newline
        #[arg(short, long)]
        raw: bool,
    },

    /// Show informations about the current debugging session
    Info {
        #[command(subcommand)]
        sub: Option<InfoCommand>,
    },

    /// Exit the emulator
    Exit,
}

#[derive(Parser, Clone, Debug)]
enum InfoCommand {
    /// List active breakpoints
    Breakpoints,

    /// Show the number of cycles since the beginning of the program
    Cycles,

    /// Show the current privilege level
    Privilege,
}

/// Holds informations about a interactive session
#[derive(Debug, Default)]
struct Session {
    /// List of active breakpoints
    breakpoints: BTreeSet<Address>,

    /// Current address for the `list` command
    list_address: Option<Address>,
}

impl Session {
    /// Add a breakpoint
    fn add_breakpoint(&mut self, address: Address) {
        if self.breakpoints.insert(address) {
            info!("Setting a breakpoint at {address:#x}");
        } else {
            warn!("A breakpoint was already set at {address:#x}");
        }
    }

    /// Remove a breakpoint
    fn remove_breakpoint(&mut self, address: Address) {
        if self.breakpoints.remove(&address) {
            info!("Removing breakpoint at {address:#x}");
        } else {
            warn!("No breakpoint was set at {address:#x}");
        }
    }

    /// Checks if the given address has a breakpoint
    fn has_breakpoint(&self, address: Address) -> bool {
        self.breakpoints.contains(&address)
    }

    /// Reset the `list` command (after running an instruction)
    fn reset_list(&mut self) {
        self.list_address = None;
    }

    /// Display the list of breakpoints
    fn display_breakpoints(&self) {
        match self.breakpoints.len() {
            0 => info!("No breakpoints"),
            1 => info!("1 breakpoint:"),
            x => info!("{} breakpoints:", x),
        }

        for address in &self.breakpoints {
            info!("  {address:#010x}");
        }
    }

    /// Display `number` instructions, starting after the last listed one
    fn list(&mut self, computer: &mut Computer, number: usize) {
        let start = self.list_address.unwrap_or(computer.registers.pc);
        let bytes = fetch_bytes(computer, start, number as u64 * 4);

        let mut listed = 0;
        for line in disassemble(&bytes, start).take(number) {
            let is_current_line = line.address == computer.registers.pc;
            let gutter = match (self.has_breakpoint(line.address), is_current_line) {
                (true, true) => "B>",
                (true, false) => "B ",
                (false, true) => " >",
                (false, false) => "  ",
            };
            info!("{gutter} {line}");
            self.list_address = Some(line.address + line.size());
            listed += 1;
        }

        if listed < number {
            info!("   {:#010x}:  –", start + bytes.len() as u64);
        }
    }
}

/// Read up to `len` bytes of instructions, as the hart would fetch them.
/// Stops at the first byte that is not mapped to RAM. The page tables are
/// not marked as accessed.
fn fetch_bytes(computer: &mut Computer, start: Address, len: u64) -> Vec<u8> {
    let mut bytes = Vec::new();
    for address in (0..len).map(|offset| start.wrapping_add(offset)) {
        let Ok(physical) = computer.inspect_translation(address, AccessType::Fetch) else {
            break;
        };
        let Ok(byte) = computer.bus.ram.read(physical, Width::Byte) else {
            break;
        };
        bytes.push(byte as u8);
    }
    bytes
}

/// Read a doubleword of RAM through the MMU, without touching the accessed
/// bits. Device registers are left alone, reading them could have side
/// effects.
fn peek(computer: &mut Computer, address: Address) -> anyhow::Result<Word> {
    let physical = computer.inspect_translation(address, AccessType::Load)?;
    Ok(computer.bus.ram.read(physical, Width::Double)?)
}

/// Write a doubleword of RAM through the MMU. The page stays clean.
fn poke(computer: &mut Computer, address: Address, value: Word) -> anyhow::Result<()> {
    let physical = computer.inspect_translation(address, AccessType::Store)?;
    computer.bus.ram.write(physical, Width::Double, value)?;
    Ok(())
}

/// Print what the guest wrote to its serial port
fn flush_output(emulator: &Emulator) {
    let output = emulator.take_output();
    if !output.is_empty() {
        let mut stdout = std::io::stdout().lock();
        // Nothing sensible to do if the terminal is gone
        let _ = stdout.write_all(&output).and_then(|()| stdout.flush());
    }
}

fn report_halt(emulator: &Emulator) {
    if let Some(code) = emulator.halted() {
        info!(code, cycles = emulator.computer().cycles, "Machine halted");
    }
}

#[allow(clippy::too_many_lines)]
pub(crate) fn run_interactive(emulator: &mut Emulator) -> anyhow::Result<ExitStatus> {
    info!("Running in interactive mode. Type \"help\" to list available commands.");
    let config = Config::builder()
        .history_ignore_space(true)
        .completion_type(CompletionType::List)
        .edit_mode(EditMode::Emacs)
        .behavior(Behavior::PreferTerm)
        .auto_add_history(true)
        .build();

    let mut session = Session::default();

    let h: RunHelper<Command> = RunHelper::new();
    let mut rl: Editor<RunHelper<Command>, DefaultHistory> = Editor::with_config(config)?;
    rl.set_helper(Some(h));

    let mut last_command: Option<Command> = None;

    'read: loop {
        // A macro to unwrap an error, log it and continue the loop
        macro_rules! warn_and_continue {
            ($e:expr) => {
                match $e {
                    Ok(o) => o,
                    Err(e) => {
                        tracing::warn!(error = %e);
                        continue 'read;
                    }
                }
            };
        }

        let Ok(readline) = rl.readline(">> ") else {
            info!("EOF, exitting");
            break;
        };

        let command = if readline.is_empty() {
            if let Some(command) = &last_command {
                command.clone()
            } else {
                info!("Type \"help\" to get the list of available commands");
                continue 'read;
            }
        } else {
            let Ok(words) = shell_words::split(readline.as_str()) else {
                warn!("Invalid input");
                continue 'read;
            };

            let command = warn_and_continue!(Command::try_parse_from(words));
            last_command = Some(command.clone());
            command
        };

        debug!("Executing command: {:?}", command);
        let halted = emulator.halted().is_some();

        match (command, halted) {
            (Command::Exit, _) => break,

            (Command::Step { number }, false) => {
                session.reset_list();

                for _ in 0..number {
                    if !emulator.step() {
                        report_halt(emulator);
                        break;
                    }
                }
                flush_output(emulator);
            }

            (Command::Continue, false) => {
                session.reset_list();

                loop {
                    if !emulator.step() {
                        report_halt(emulator);
                        break;
                    }

                    let computer = emulator.computer();
                    if session.has_breakpoint(computer.registers.pc) {
                        info!("Stopped at a breakpoint at {:#x}", computer.registers.pc);
                        break;
                    }
                    if computer.cycles % FLUSH_INTERVAL == 0 {
                        flush_output(emulator);
                    }
                }
                flush_output(emulator);
            }

            (Command::Registers { register }, _) => {
                let registers = &emulator.computer().registers;
                if let Some(reg) = register {
                    info!("Register {} = {:#018x}", reg, registers.get(reg));
                } else {
                    info!("Registers:\n{}", registers);
                }
            }

            (Command::Csr { csr }, _) => {
                let value = emulator.computer().csrs.read(csr);
                info!("CSR {csr} = {value:#018x}");
            }

            (Command::Memory { address, number }, _) => {
                let computer = emulator.computer_mut();
                let address = address.evaluate(computer);
                for i in 0..number {
                    let address = address.wrapping_add(i * 8);
                    let value = warn_and_continue!(peek(computer, address));
                    info!("{address:#010x}:  {value:#018x}");
                }
            }

            (Command::Set { target, value }, false) => {
                let computer = emulator.computer_mut();
                let value = value.evaluate(computer);
                match target {
                    parse::AssignmentTarget::Memory(address) => {
                        let address = address.evaluate(computer);
                        info!("Setting memory at address {address:#x} to {value:#x}");
                        warn_and_continue!(poke(computer, address, value));
                    }
                    parse::AssignmentTarget::Register(reg) => {
                        info!("Setting register {reg} to {value:#x}");
                        computer.registers.set(reg, value);
                    }
                    parse::AssignmentTarget::Pc => {
                        info!("Jumping to {value:#x}");
                        computer.registers.pc = value;
                        session.reset_list();
                    }
                }
            }

            (Command::List { number }, _) => {
                session.list(emulator.computer_mut(), number);
            }

            (Command::Break { address }, _) => {
                session.add_breakpoint(address.evaluate(emulator.computer()));
            }

            (Command::Unbreak { address }, _) => {
                session.remove_breakpoint(address.evaluate(emulator.computer()));
            }

            (Command::Input { text, raw }, false) => {
                let mut text = text.join(" ");
                if !raw {
                    text.push('\n');
                }
                emulator.console_input().push_str(&text);
            }

            (Command::Info { sub }, _) => {
                let computer = emulator.computer();
                match sub {
                    Some(InfoCommand::Breakpoints) => session.display_breakpoints(),
                    Some(InfoCommand::Cycles) => info!("Cycles: {}", computer.cycles),
                    Some(InfoCommand::Privilege) => info!("Privilege: {}", computer.privilege),
                    None => {
                        session.display_breakpoints();
                        info!("–");
                        info!("Cycles: {}", computer.cycles);
                        info!("Privilege: {}", computer.privilege);
                    }
                }
            }

            (_, true) => {
                // Machine is halted but the user asked to run it, we just warn
                warn!("Machine is halted. Use \"exit\" to quit");
            }
        }
    }

    Ok(emulator
        .halted()
        .map_or(ExitStatus::Cancelled, |code| ExitStatus::Halted { code }))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rivet_emulator::constants::RAM_BASE;
    use rivet_emulator::runtime::Privilege;
    use rivet_emulator::MachineConfig;

    use super::*;

    const ROOT: Address = RAM_BASE + 0x1000;
    /// Valid, readable, writable and executable, but neither accessed nor dirty
    const FRESH_GIGAPAGE: Word = ((RAM_BASE >> 12) << 10) | 0b1111;

    /// A machine in S-mode with the RAM gigapage identity-mapped
    fn paged() -> Emulator {
        let mut emulator = Emulator::new(MachineConfig {
            ram_size: 0x1_0000,
            ..MachineConfig::default()
        })
        .unwrap();
        let computer = emulator.computer_mut();
        computer
            .bus
            .ram
            .write(ROOT + 2 * 8, Width::Double, FRESH_GIGAPAGE)
            .unwrap();
        computer
            .bus
            .ram
            .write(RAM_BASE + 0x100, Width::Double, 0x0000_0013)
            .unwrap();
        computer.csrs.satp = (8 << 60) | (ROOT >> 12);
        computer.privilege = Privilege::Supervisor;
        emulator
    }

    fn root_entry(computer: &Computer) -> Word {
        computer.bus.ram.read(ROOT + 2 * 8, Width::Double).unwrap()
    }

    #[test]
    fn inspection_leaves_page_tables_test() {
        let mut emulator = paged();
        let computer = emulator.computer_mut();

        assert_eq!(peek(computer, RAM_BASE + 0x100).unwrap(), 0x13);
        assert_eq!(fetch_bytes(computer, RAM_BASE + 0x100, 4), [0x13, 0, 0, 0]);
        poke(computer, RAM_BASE + 0x108, 42).unwrap();
        assert_eq!(peek(computer, RAM_BASE + 0x108).unwrap(), 42);

        assert_eq!(root_entry(computer), FRESH_GIGAPAGE);
    }

    #[test]
    fn unmapped_inspection_test() {
        let mut emulator = paged();
        let computer = emulator.computer_mut();

        assert!(peek(computer, 0x4000_0000).is_err());
        assert!(fetch_bytes(computer, 0x4000_0000, 4).is_empty());
        // The last mapped bytes are read up to the end of the RAM
        let end = RAM_BASE + 0x1_0000;
        assert_eq!(fetch_bytes(computer, end - 2, 4).len(), 2);
    }
}
