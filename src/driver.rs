//! The execution driver: the single-threaded batch-stepping loop described in §5.
//!
//! There is no internal concurrency. `run_batch` executes up to a bounded number of instructions
//! and returns control to its caller (the CLI's REPL-like loop, or a single `wasm_bindgen` call
//! from the browser's own animation-frame callback) rather than blocking indefinitely. A core
//! that halts or hits an unimplemented opcode stops the batch early; a core waiting on console
//! input is the caller's job to detect via [`crate::console::ConsolePort::has_input`] before
//! calling back in.

use std::io::Write;

use log::{error, warn};

use crate::cpu::{StepOutcome, Z80Core};
use crate::disk::DiskService;
use crate::hbios::{DispatchOutcome, Dispatcher};
use crate::hostio::HostIo;
use crate::memory::{BankedMemory, Memory};
use crate::console::ConsolePort;
use crate::ports::{self, PortBus};

/// Why [`ExecutionDriver::run_batch`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// The instruction budget was exhausted; the core is still runnable.
    BudgetExhausted,
    /// The core executed `HALT`.
    Halted,
    /// The core hit an opcode it could not decode. Fatal, per §7.
    UnimplementedOpcode(u8),
    /// `--strict-io` rejected an access to an unrecognized port. Fatal, per §6.
    StrictIoViolation(u8),
    /// The core requested console input in a deployment that can't block for it, and none was
    /// queued (§3, §9). PC is left untouched; the caller should queue input and call back in.
    WaitingForInput,
}

/// Tracks whether the machine is running, halted, or waiting on input, and drives the
/// fetch/trap/execute loop.
#[derive(Default)]
pub struct ExecutionDriver {
    running: bool,
    halted: bool,
    waiting_for_input: bool,
    instructions_executed: u64,
    strict_io: bool,
    debug: bool,
    blocking_allowed: bool,
    trace: Option<Box<dyn Write>>,
}

impl std::fmt::Debug for ExecutionDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionDriver")
            .field("running", &self.running)
            .field("halted", &self.halted)
            .field("waiting_for_input", &self.waiting_for_input)
            .field("instructions_executed", &self.instructions_executed)
            .field("strict_io", &self.strict_io)
            .field("debug", &self.debug)
            .field("blocking_allowed", &self.blocking_allowed)
            .field("trace", &self.trace.is_some())
            .finish()
    }
}

impl ExecutionDriver {
    pub fn new() -> Self {
        ExecutionDriver {
            running: true,
            halted: false,
            waiting_for_input: false,
            instructions_executed: 0,
            strict_io: false,
            debug: false,
            blocking_allowed: true,
            trace: None,
        }
    }

    /// Rejects accesses to unrecognized ports instead of the default read-0xFF/drop-write policy
    /// (§6's `--strict-io`).
    pub fn with_strict_io(mut self, strict_io: bool) -> Self {
        self.strict_io = strict_io;
        self
    }

    /// Whether the host can leave a console-input call unfinished and retry it later (§9). `true`
    /// (the default) keeps the old behavior of completing immediately with a `NotReady` status;
    /// `false` (the browser bindings) instead raises [`BatchOutcome::WaitingForInput`] without
    /// advancing PC, since that deployment's event loop can't block for a byte that isn't there.
    pub fn with_blocking_allowed(mut self, blocking_allowed: bool) -> Self {
        self.blocking_allowed = blocking_allowed;
        self
    }

    /// Raises diagnostic verbosity (§3.1): with a trace sink attached, each trap and `HALT` is
    /// logged to it.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// A host-supplied sink that receives one line per executed trap and per `HALT` when the
    /// debug flag is set, mirroring the teacher's `serial_out`.
    pub fn with_trace_sink(mut self, sink: impl Write + 'static) -> Self {
        self.trace = Some(Box::new(sink));
        self
    }

    fn trace_line(&mut self, pc: u16, what: &str) {
        if !self.debug {
            return;
        }
        if let Some(sink) = &mut self.trace {
            writeln!(sink, "[{}] pc=0x{:04X} {}", self.instructions_executed, pc, what)
                .expect("failed to write trace output");
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Whether the most recently returned batch stopped because a console-input call had nothing
    /// to read in a deployment that can't block for it.
    pub fn is_waiting_for_input(&self) -> bool {
        self.waiting_for_input
    }

    pub fn instructions_executed(&self) -> u64 {
        self.instructions_executed
    }

    /// Resumes a halted machine, e.g. after a host-initiated reset.
    pub fn resume(&mut self) {
        self.running = true;
        self.halted = false;
    }

    /// Executes up to `budget` instructions, stopping early on `HALT`, an unimplemented opcode, or
    /// an HBIOS trap that leaves the machine unable to make progress (none currently do, but the
    /// shape is here for a future blocking service).
    #[allow(clippy::too_many_arguments)]
    pub fn run_batch(
        &mut self,
        budget: u32,
        core: &mut dyn Z80Core,
        memory: &mut BankedMemory,
        dispatcher: &Dispatcher,
        console: &mut ConsolePort,
        disk: &mut DiskService,
        host: &mut dyn HostIo,
        port_bus: &mut PortBus,
    ) -> BatchOutcome {
        if !self.running {
            return BatchOutcome::Halted;
        }

        self.waiting_for_input = false;

        for _ in 0..budget {
            let pc = core.get_pc();

            match dispatcher.dispatch(pc, core, memory, console, disk, host, self.blocking_allowed) {
                DispatchOutcome::Handled => {
                    self.instructions_executed += 1;
                    self.trace_line(pc, "trap");
                    continue;
                }
                DispatchOutcome::Waiting => {
                    self.waiting_for_input = true;
                    self.trace_line(pc, "waiting for input");
                    return BatchOutcome::WaitingForInput;
                }
                DispatchOutcome::NotTrapped => {}
            }

            if core.port_io().is_none() {
                let opcode = memory.fetch(pc);

                if opcode == ports::OPCODE_IN || opcode == ports::OPCODE_OUT {
                    let port = memory.fetch(pc.wrapping_add(1));

                    let recognized = if opcode == ports::OPCODE_IN {
                        match port_bus.read(port, memory, console) {
                            Some(value) => {
                                core.set_a(value);
                                true
                            }
                            None => {
                                core.set_a(0xFF);
                                !self.strict_io
                            }
                        }
                    } else {
                        let value = core.get_a();
                        let handled =
                            port_bus.write(port, value, core, memory, console, disk, dispatcher, host);
                        handled || !self.strict_io
                    };

                    if !recognized {
                        self.running = false;
                        self.halted = true;
                        warn!("rejected unrecognized port 0x{:02X} under --strict-io", port);
                        return BatchOutcome::StrictIoViolation(port);
                    }

                    core.set_pc(pc.wrapping_add(2));
                    self.instructions_executed += 1;
                    continue;
                }
            }

            match core.execute_one(memory) {
                StepOutcome::Normal => {
                    self.instructions_executed += 1;
                }
                StepOutcome::Halted => {
                    self.running = false;
                    self.halted = true;
                    self.instructions_executed += 1;
                    self.trace_line(pc, "halt");
                    return BatchOutcome::Halted;
                }
                StepOutcome::UnimplementedOpcode(opcode) => {
                    self.running = false;
                    self.halted = true;
                    error!("unimplemented opcode 0x{:02X} at PC=0x{:04X}", opcode, pc);
                    return BatchOutcome::UnimplementedOpcode(opcode);
                }
            }
        }

        BatchOutcome::BudgetExhausted
    }
}
