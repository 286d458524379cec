pub mod asm;
pub mod constants;
pub mod machine;
pub mod runtime;

pub use self::machine::{Emulator, ExitStatus, MachineConfig, MachineError};
