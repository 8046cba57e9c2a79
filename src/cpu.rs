//! The Z80 core contract.
//!
//! Per §1, the instruction decoder/executor itself is an external collaborator: this crate
//! never fetches or decodes an opcode. What it does own is the *contract* a core must satisfy so
//! the execution driver and HBIOS dispatcher can drive it: register access, PC/SP, a mode
//! selector, and a single-instruction step function that receives the banked memory.

use crate::memory::Memory;

/// The two instruction sets a core may be asked to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuMode {
    Z80,
    Intel8080,
}

impl Default for CpuMode {
    fn default() -> Self {
        CpuMode::Z80
    }
}

/// What happened during a single [`Z80Core::execute_one`] call, as far as the driver cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// A normal instruction executed; the driver should keep going.
    Normal,
    /// The core executed `HALT` (0x76). Per §4.2, the driver clears `running` and sets `halted`.
    Halted,
    /// The core could not decode the opcode at the current PC. A fatal condition per §7: the
    /// driver sets `halted`, clears `running`, and logs a diagnostic.
    UnimplementedOpcode(u8),
}

/// An optional delegate a core may implement so that port-mapped I/O is routed through it
/// instead of being opcode-intercepted by the driver (§6, §9 "Port-I/O interception vs
/// delegate"). The two realizations are equivalent as long as effects are visible to subsequent
/// fetches within the same batch.
pub trait PortIo {
    fn port_in(&mut self, port: u8) -> u8;
    fn port_out(&mut self, port: u8, value: u8);
}

/// The register-and-control surface the HBIOS dispatcher and execution driver need from a Z80
/// core. Register pairs (`bc`, `de`, `hl`) are provided as default methods composed from the
/// 8-bit accessors, high byte first, matching Z80 convention.
pub trait Z80Core {
    fn get_a(&self) -> u8;
    fn set_a(&mut self, value: u8);

    fn get_b(&self) -> u8;
    fn set_b(&mut self, value: u8);

    fn get_c(&self) -> u8;
    fn set_c(&mut self, value: u8);

    fn get_d(&self) -> u8;
    fn set_d(&mut self, value: u8);

    fn get_e(&self) -> u8;
    fn set_e(&mut self, value: u8);

    fn get_h(&self) -> u8;
    fn set_h(&mut self, value: u8);

    fn get_l(&self) -> u8;
    fn set_l(&mut self, value: u8);

    fn get_pc(&self) -> u16;
    fn set_pc(&mut self, value: u16);

    fn get_sp(&self) -> u16;
    fn set_sp(&mut self, value: u16);

    /// Selects the instruction set the core should decode. At least Z80 vs 8080 must be
    /// supported, per §6.
    fn set_mode(&mut self, mode: CpuMode);
    fn mode(&self) -> CpuMode;

    /// Fetches and executes exactly one instruction through `memory`.
    fn execute_one(&mut self, memory: &mut dyn Memory) -> StepOutcome;

    /// Returns the core's port I/O delegate, if it implements one. Cores that don't must have the
    /// driver intercept `IN`/`OUT` opcodes ahead of dispatch instead (§6).
    fn port_io(&mut self) -> Option<&mut dyn PortIo> {
        None
    }

    fn bc(&self) -> u16 {
        (self.get_b() as u16) << 8 | self.get_c() as u16
    }

    fn de(&self) -> u16 {
        (self.get_d() as u16) << 8 | self.get_e() as u16
    }

    fn hl(&self) -> u16 {
        (self.get_h() as u16) << 8 | self.get_l() as u16
    }

    fn set_hl(&mut self, value: u16) {
        self.set_h((value >> 8) as u8);
        self.set_l(value as u8);
    }

    /// Pops a 16-bit value off the Z80 stack, through `memory`, advancing SP by 2.
    fn pop(&mut self, memory: &dyn Memory) -> u16 {
        let sp = self.get_sp();
        let value = memory.fetch_word(sp);
        self.set_sp(sp.wrapping_add(2));
        value
    }

    /// Pushes a 16-bit value onto the Z80 stack, through `memory`, decrementing SP by 2 first.
    fn push(&mut self, memory: &mut dyn Memory, value: u16) {
        let sp = self.get_sp().wrapping_sub(2);
        memory.store_word(sp, value);
        self.set_sp(sp);
    }
}
