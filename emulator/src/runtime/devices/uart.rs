use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::warn;

use crate::constants::UART_IRQ;
use crate::runtime::bus::{Device, InterruptLines};
use crate::runtime::memory::{Memory, Width};

const RBR_THR: u64 = 0;
const IER: u64 = 1;
const IIR_FCR: u64 = 2;
const LCR: u64 = 3;
const MCR: u64 = 4;
const LSR: u64 = 5;
const MSR: u64 = 6;
const SCR: u64 = 7;

const IER_RX: u8 = 1 << 0;
const IER_TX: u8 = 1 << 1;

/// FIFOs enabled, in the two top bits of IIR
const IIR_FIFO: u8 = 0xC0;
const IIR_NONE: u8 = 0x01;
const IIR_THR_EMPTY: u8 = 0x02;
const IIR_RX_READY: u8 = 0x04;

const LCR_DLAB: u8 = 1 << 7;

const LSR_DATA_READY: u8 = 1 << 0;
/// Transmission is instantaneous: the holding register and the shift
/// register are always empty
const LSR_TX_IDLE: u8 = (1 << 5) | (1 << 6);

/// Carrier detect, data set ready, clear to send
const MSR_CONNECTED: u8 = 0xB0;

/// Host side of the serial console
///
/// Input pushed here is read by the guest through RBR, in order. Bytes the
/// guest writes to THR show up in [`Console::pop_output`].
#[derive(Debug)]
pub struct Console {
    input: ConsoleInput,
    output: ConsoleOutput,
}

/// Cloneable handle to feed the console from other threads
#[derive(Debug, Clone)]
pub struct ConsoleInput(Sender<u8>);

impl ConsoleInput {
    /// Queue one byte for the guest. Never blocks.
    pub fn push(&self, byte: u8) {
        // Only fails once the machine is gone, at which point nobody reads
        let _ = self.0.send(byte);
    }

    /// Queue every byte of `text`, in order
    pub fn push_str(&self, text: &str) {
        for byte in text.bytes() {
            self.push(byte);
        }
    }
}

/// Cloneable handle to read what the guest printed from other threads.
///
/// Every byte is delivered to exactly one reader.
#[derive(Debug, Clone)]
pub struct ConsoleOutput(Arc<Mutex<Receiver<u8>>>);

impl ConsoleOutput {
    fn receiver(&self) -> MutexGuard<'_, Receiver<u8>> {
        // The receiver holds no invariant a panicking reader could break
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Next byte written by the guest, if any. Never blocks.
    #[must_use]
    pub fn pop(&self) -> Option<u8> {
        self.receiver().try_recv().ok()
    }

    /// Every byte written so far and not read yet
    #[must_use]
    pub fn drain(&self) -> Vec<u8> {
        self.receiver().try_iter().collect()
    }

    /// Wait up to `timeout` for the next byte.
    ///
    /// Returns `None` on timeout, or once the machine is gone and every byte
    /// was read.
    #[must_use]
    pub fn recv_timeout(&self, timeout: Duration) -> Option<u8> {
        match self.receiver().recv_timeout(timeout) {
            Ok(byte) => Some(byte),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }
}

impl Console {
    pub fn push_input(&self, byte: u8) {
        self.input.push(byte);
    }

    pub fn push_str(&self, text: &str) {
        self.input.push_str(text);
    }

    /// Next byte written by the guest, if any
    #[must_use]
    pub fn pop_output(&self) -> Option<u8> {
        self.output.pop()
    }

    /// Everything written by the guest so far
    #[must_use]
    pub fn drain_output(&self) -> Vec<u8> {
        self.output.drain()
    }

    #[must_use]
    pub fn input(&self) -> ConsoleInput {
        self.input.clone()
    }

    #[must_use]
    pub fn output(&self) -> ConsoleOutput {
        self.output.clone()
    }
}

/// 16550-compatible UART
#[derive(Debug)]
pub struct Uart {
    input: Receiver<u8>,
    output: Sender<u8>,

    /// Bytes already taken from the channel but not read by the guest yet
    rx: VecDeque<u8>,

    /// Transmitter-empty interrupt condition, cleared by reading IIR
    thr_empty: bool,

    ier: u8,
    lcr: u8,
    mcr: u8,
    scr: u8,
    divisor: u16,
}

impl Uart {
    /// Create the device and the console attached to it
    #[must_use]
    pub fn new() -> (Self, Console) {
        let (input_tx, input_rx) = mpsc::channel();
        let (output_tx, output_rx) = mpsc::channel();

        let uart = Self {
            input: input_rx,
            output: output_tx,
            rx: VecDeque::new(),
            thr_empty: false,
            ier: 0,
            lcr: 0,
            mcr: 0,
            scr: 0,
            divisor: 0,
        };
        let console = Console {
            input: ConsoleInput(input_tx),
            output: ConsoleOutput(Arc::new(Mutex::new(output_rx))),
        };

        (uart, console)
    }

    fn poll_input(&mut self) {
        self.rx.extend(self.input.try_iter());
    }

    fn data_ready(&mut self) -> bool {
        self.poll_input();
        !self.rx.is_empty()
    }

    fn dlab(&self) -> bool {
        self.lcr & LCR_DLAB != 0
    }

    fn interrupt_pending(&mut self) -> bool {
        (self.ier & IER_RX != 0 && self.data_ready()) || (self.ier & IER_TX != 0 && self.thr_empty)
    }

    fn read_iir(&mut self) -> u8 {
        if self.ier & IER_RX != 0 && self.data_ready() {
            IIR_FIFO | IIR_RX_READY
        } else if self.ier & IER_TX != 0 && self.thr_empty {
            self.thr_empty = false;
            IIR_FIFO | IIR_THR_EMPTY
        } else {
            IIR_FIFO | IIR_NONE
        }
    }
}

impl Device for Uart {
    fn read(&mut self, offset: u64, _width: Width) -> u64 {
        let value = match offset {
            RBR_THR if self.dlab() => self.divisor as u8,
            RBR_THR => {
                self.poll_input();
                self.rx.pop_front().unwrap_or(0)
            }
            IER if self.dlab() => (self.divisor >> 8) as u8,
            IER => self.ier,
            IIR_FCR => self.read_iir(),
            LCR => self.lcr,
            MCR => self.mcr,
            LSR => {
                let ready = if self.data_ready() { LSR_DATA_READY } else { 0 };
                LSR_TX_IDLE | ready
            }
            MSR => MSR_CONNECTED,
            SCR => self.scr,
            _ => {
                warn!(offset, "Read from unknown UART register");
                0
            }
        };
        u64::from(value)
    }

    fn write(&mut self, offset: u64, _width: Width, value: u64) {
        let value = value as u8;
        match offset {
            RBR_THR if self.dlab() => self.divisor = (self.divisor & 0xFF00) | u16::from(value),
            RBR_THR => {
                let _ = self.output.send(value);
                self.thr_empty = true;
            }
            IER if self.dlab() => {
                self.divisor = (self.divisor & 0x00FF) | (u16::from(value) << 8);
            }
            IER => {
                // Enabling the transmitter interrupt reports the empty THR right away
                if value & IER_TX != 0 && self.ier & IER_TX == 0 {
                    self.thr_empty = true;
                }
                self.ier = value & 0x0F;
            }
            // FIFOs are always on and never flushed, so that input queued
            // before the driver initialises the port is kept
            IIR_FCR => {}
            LCR => self.lcr = value,
            MCR => self.mcr = value,
            SCR => self.scr = value,
            LSR | MSR => {}
            _ => warn!(offset, value, "Write to unknown UART register"),
        }
    }

    fn tick(&mut self, _ram: &mut Memory, lines: &mut InterruptLines) {
        if self.interrupt_pending() {
            lines.sources |= 1 << UART_IRQ;
        }
    }

    /// Registers go back to zero. Input already queued by the host is kept.
    fn reset(&mut self) {
        self.thr_empty = false;
        self.ier = 0;
        self.lcr = 0;
        self.mcr = 0;
        self.scr = 0;
        self.divisor = 0;
    }
}
