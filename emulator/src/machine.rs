//! The whole machine: a hart, its RAM and the devices of the `virt` board

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use miette::Diagnostic;
use thiserror::Error;
use tracing::{debug, info};

use crate::constants::{
    Address, CLINT_BASE, CLINT_SIZE, FINISHER_BASE, FINISHER_SIZE, MAX_RAM_SIZE, PAGE_SIZE,
    PLIC_BASE, PLIC_SIZE, RAM_BASE, RAM_SIZE, UART_BASE, UART_SIZE, VIRTIO_BASE, VIRTIO_SIZE,
};
use crate::runtime::devices::{
    Clint, Console, ConsoleInput, ConsoleOutput, Finisher, Plic, Uart, VirtioBlock,
};
use crate::runtime::{Bus, BusError, Computer, Memory, ProcessorError, Reg};

/// How the machine is put together
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineConfig {
    pub ram_base: Address,
    pub ram_size: u64,

    /// Image of the virtio block device. The slot is empty without one.
    pub disk: Option<Vec<u8>>,

    /// How much the machine timer advances every step
    pub timer_increment: u64,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            ram_base: RAM_BASE,
            ram_size: RAM_SIZE,
            disk: None,
            timer_increment: 1,
        }
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum MachineError {
    #[error("could not map the devices")]
    #[diagnostic(
        code(rivet::machine::bus),
        help("device ranges must not overlap the RAM or each other")
    )]
    Bus(#[from] BusError),

    #[error("image of {size} bytes does not fit in {ram_size} bytes of RAM")]
    #[diagnostic(code(rivet::machine::image_too_large), help("use a larger RAM size"))]
    ImageTooLarge { size: u64, ram_size: u64 },

    #[error("invalid machine configuration: {reason}")]
    #[diagnostic(code(rivet::machine::config))]
    InvalidConfig { reason: &'static str },
}

/// Why [`Emulator::run`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Software stopped the machine
    Halted { code: u32 },

    /// The cancellation token was set
    Cancelled,

    /// The step budget ran out
    StepLimit,
}

impl ExitStatus {
    /// Process exit code: the halt code, or 124 like `timeout(1)` otherwise
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Halted { code } => code as i32,
            Self::Cancelled | Self::StepLimit => 124,
        }
    }
}

pub struct Emulator {
    computer: Computer,
    console: Console,
    cancel: Arc<AtomicBool>,
    halted: Option<u32>,
}

impl std::fmt::Debug for Emulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emulator")
            .field("computer", &self.computer)
            .field("halted", &self.halted)
            .finish_non_exhaustive()
    }
}

impl Emulator {
    /// Build the machine described by `config`
    ///
    /// # Errors
    ///
    /// Fails if the RAM is empty, larger than [`MAX_RAM_SIZE`], not
    /// page-aligned, or overlaps a device
    #[tracing::instrument(skip_all, fields(ram_base = config.ram_base, ram_size = config.ram_size))]
    pub fn new(config: MachineConfig) -> Result<Self, MachineError> {
        if config.ram_size == 0 {
            return Err(MachineError::InvalidConfig {
                reason: "the RAM is empty",
            });
        }
        if config.ram_size > MAX_RAM_SIZE || usize::try_from(config.ram_size).is_err() {
            return Err(MachineError::InvalidConfig {
                reason: "the RAM is too large",
            });
        }
        if config.ram_base % PAGE_SIZE != 0 || config.ram_size % PAGE_SIZE != 0 {
            return Err(MachineError::InvalidConfig {
                reason: "the RAM must be page-aligned",
            });
        }
        if config.ram_base.checked_add(config.ram_size).is_none() {
            return Err(MachineError::InvalidConfig {
                reason: "the RAM ends past the address space",
            });
        }

        let mut bus = Bus::new(Memory::new(config.ram_base, config.ram_size));
        let (uart, console) = Uart::new();

        bus.register(
            "finisher",
            FINISHER_BASE,
            FINISHER_SIZE,
            Box::new(Finisher::default()),
        )?;
        bus.register(
            "clint",
            CLINT_BASE,
            CLINT_SIZE,
            Box::new(Clint::new(config.timer_increment)),
        )?;
        bus.register("plic", PLIC_BASE, PLIC_SIZE, Box::new(Plic::new()))?;
        bus.register("uart", UART_BASE, UART_SIZE, Box::new(uart))?;
        bus.register(
            "virtio",
            VIRTIO_BASE,
            VIRTIO_SIZE,
            Box::new(VirtioBlock::new(config.disk)),
        )?;
        debug!(?bus, "Machine ready");

        let mut computer = Computer::new(bus);
        computer.reset(config.ram_base);

        Ok(Self {
            computer,
            console,
            cancel: Arc::new(AtomicBool::new(false)),
            halted: None,
        })
    }

    /// Power-cycle the machine and copy a raw image at the start of the RAM.
    ///
    /// The RAM is cleared and every device goes back to its power-on state,
    /// so nothing from a previous image survives. The disk keeps its content
    /// and the console stays attached. The hart starts the image in M-mode,
    /// with `a0` holding the hart id and no device tree in `a1`.
    ///
    /// # Errors
    ///
    /// Fails if the image is larger than the RAM. The machine is left
    /// untouched in that case.
    #[tracing::instrument(skip_all, fields(size = image.len()))]
    pub fn load_image(&mut self, image: &[u8]) -> Result<(), MachineError> {
        let (base, ram_size) = (self.computer.bus.ram.base(), self.computer.bus.ram.size());
        let size = image.len() as u64;
        let too_large = MachineError::ImageTooLarge { size, ram_size };

        if size > ram_size {
            return Err(too_large);
        }

        self.computer.bus.reset();
        self.computer
            .bus
            .ram
            .write_bytes(base, image)
            .map_err(|_| too_large)?;

        self.computer.reset(base);
        self.computer.registers.set(Reg::A0, 0);
        self.computer.registers.set(Reg::A1, 0);
        self.halted = None;
        info!(base, size, "Image loaded");
        Ok(())
    }

    /// Run one cycle. Returns whether the machine can keep going.
    pub fn step(&mut self) -> bool {
        if self.halted.is_some() {
            return false;
        }

        match self.computer.step() {
            Ok(()) => true,
            Err(ProcessorError::Halted { code }) => {
                info!(code, cycles = self.computer.cycles, "Machine halted");
                self.halted = Some(code);
                false
            }
        }
    }

    /// Run until the machine halts or is cancelled
    #[tracing::instrument(skip(self))]
    pub fn run(&mut self) -> ExitStatus {
        self.run_until(None)
    }

    /// Run at most `max_steps` cycles
    #[tracing::instrument(skip(self))]
    pub fn run_for(&mut self, max_steps: u64) -> ExitStatus {
        self.run_until(Some(max_steps))
    }

    fn run_until(&mut self, max_steps: Option<u64>) -> ExitStatus {
        let mut steps = 0;
        loop {
            if let Some(code) = self.halted {
                return ExitStatus::Halted { code };
            }
            if self.cancel.load(Ordering::Relaxed) {
                info!(steps, "Cancelled");
                return ExitStatus::Cancelled;
            }
            if max_steps.is_some_and(|max| steps >= max) {
                info!(steps, "Step limit reached");
                return ExitStatus::StepLimit;
            }

            self.step();
            steps += 1;
        }
    }

    /// Exit code requested by software, once halted
    #[must_use]
    pub const fn halted(&self) -> Option<u32> {
        self.halted
    }

    /// Queue a byte for the guest's serial port
    pub fn feed_input(&self, byte: u8) {
        self.console.push_input(byte);
    }

    /// Next byte written by the guest to its serial port
    #[must_use]
    pub fn drain_output(&self) -> Option<u8> {
        self.console.pop_output()
    }

    /// Every byte written so far and not drained yet
    #[must_use]
    pub fn take_output(&self) -> Vec<u8> {
        self.console.drain_output()
    }

    /// Handle to feed the serial port from another thread
    #[must_use]
    pub fn console_input(&self) -> ConsoleInput {
        self.console.input()
    }

    /// Handle to read the serial port from another thread
    #[must_use]
    pub fn console_output(&self) -> ConsoleOutput {
        self.console.output()
    }

    /// Flag stopping [`Emulator::run`] at the next step once set
    #[must_use]
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    #[must_use]
    pub const fn computer(&self) -> &Computer {
        &self.computer
    }

    pub fn computer_mut(&mut self) -> &mut Computer {
        &mut self.computer
    }
}
