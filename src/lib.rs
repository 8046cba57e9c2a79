//! An emulator for a Z80 single-board computer running the RomWBW firmware and CP/M.
//!
//! This crate does not decode Z80 instructions itself; it owns the banked memory subsystem, the
//! HBIOS interception engine, the disk service, and the single-threaded execution driver that
//! ties them together around a caller-supplied [`cpu::Z80Core`].

#![allow(clippy::needless_range_loop)]

pub mod console;
pub mod cpu;
pub mod disk;
pub mod driver;
pub mod hbios;
pub mod hostio;
pub mod memory;
pub mod ports;

#[cfg(target_arch = "wasm32")]
pub mod web;

use std::cell::RefCell;
use std::rc::Rc;

use log::info;

use crate::console::ConsolePort;
use crate::cpu::Z80Core;
use crate::disk::{DiskError, DiskService};
use crate::driver::{BatchOutcome, ExecutionDriver};
use crate::hbios::Dispatcher;
use crate::hostio::HostIo;
use crate::memory::hcb;
use crate::memory::BankedMemory;
use crate::ports::PortBus;

/// Default firmware version stamped into the identification block when a builder doesn't specify
/// one.
const DEFAULT_VERSION: (u8, u8) = (3, 0);

/// Default per-batch instruction budget, chosen so a native CLI loop stays responsive to console
/// input without returning to its caller on every single instruction.
const DEFAULT_BATCH_SIZE: u32 = 10_000;

/// The emulator: owns every component and exposes the coarse-grained operations a host (CLI or
/// browser) drives it with.
pub struct Emulator {
    memory: Rc<RefCell<BankedMemory>>,
    console: ConsolePort,
    disk: DiskService,
    dispatcher: Dispatcher,
    driver: ExecutionDriver,
    host: Box<dyn HostIo>,
    port_bus: PortBus,
    batch_size: u32,
}

impl Emulator {
    /// Creates a new emulator builder.
    pub fn builder() -> EmulatorBuilder {
        EmulatorBuilder::new()
    }

    /// Loads a ROM image and performs first-boot bring-up (HCB install, identification stamp,
    /// bank projection armed), then reads the HCB's memory-disk configuration byte and synthesizes
    /// whichever of MD0 (RAM disk) and MD1 (ROM disk) it enables, before writing the disk-unit
    /// table so the boot loader's discovery routine sees them (§4.3). Idempotent.
    pub fn load_rom(&mut self, image: &[u8]) {
        let config = {
            let mut memory = self.memory.borrow_mut();
            memory.load_rom(image);
            self.dispatcher.bring_up(&mut memory, image);
            hcb::read_memory_disk_config(&memory)
        };

        if config & hcb::MEMORY_DISK_MD0_ENABLED != 0 {
            self.load_memory_disk(hcb::MD0_UNIT, false, 0, disk::COMBO_SLICE_SIZE)
                .expect("MD0 unit index is always in range");
        }
        if config & hcb::MEMORY_DISK_MD1_ENABLED != 0 {
            self.load_memory_disk(hcb::MD1_UNIT, true, 0, disk::COMBO_SLICE_SIZE)
                .expect("MD1 unit index is always in range");
        }

        self.write_disk_unit_table();

        info!("loaded ROM image ({} bytes)", image.len());
    }

    /// Loads a raw disk image into `unit`, auto-detecting its format.
    pub fn load_disk(&mut self, unit: usize, image: Vec<u8>) -> Result<(), DiskError> {
        self.disk.load(unit, image)?;
        self.write_disk_unit_table();
        Ok(())
    }

    /// Carves out a memory-disk unit from the ROM or RAM store (§4.4.1), for the synthesized MD0
    /// (RAM disk) and MD1 (ROM disk) units RomWBW expects to find pre-populated.
    pub fn load_memory_disk(
        &mut self,
        unit: usize,
        in_rom: bool,
        base: usize,
        len: usize,
    ) -> Result<(), DiskError> {
        self.disk
            .load_memory_disk(unit, self.memory.clone(), in_rom, base, len)?;
        self.write_disk_unit_table();
        Ok(())
    }

    pub fn unload_disk(&mut self, unit: usize) -> Result<(), DiskError> {
        self.disk.unload(unit)?;
        self.write_disk_unit_table();
        Ok(())
    }

    /// Refreshes the HCB's disk-unit table to reflect which units are currently loaded.
    fn write_disk_unit_table(&mut self) {
        let mut units = [false; hcb::MAX_UNITS];
        for (i, loaded) in units.iter_mut().enumerate() {
            *loaded = self.disk.is_loaded(i);
        }

        hcb::write_disk_unit_table(&mut self.memory.borrow_mut(), &units);
    }

    /// Pushes a byte into the guest-bound console input queue.
    pub fn queue_input(&mut self, byte: u8) {
        self.console.queue_char(byte);
    }

    /// Drains and returns every byte the guest has written to the console since the last drain.
    pub fn drain_output(&mut self) -> Vec<u8> {
        self.console.drain_output()
    }

    /// Whether the guest has written anything that hasn't been drained yet.
    pub fn has_output(&self) -> bool {
        !self.console.peek_output().is_empty()
    }

    pub fn is_halted(&self) -> bool {
        self.driver.is_halted()
    }

    /// Resumes a halted machine.
    pub fn resume(&mut self) {
        self.driver.resume();
    }

    /// Whether the most recent batch stopped because a console-input call had nothing to read in
    /// a deployment that can't block for it.
    pub fn is_waiting_for_input(&self) -> bool {
        self.driver.is_waiting_for_input()
    }

    /// Runs one batch of up to this emulator's configured instruction budget against `core`.
    pub fn run_batch(&mut self, core: &mut dyn Z80Core) -> BatchOutcome {
        let mut memory = self.memory.borrow_mut();
        self.driver.run_batch(
            self.batch_size,
            core,
            &mut memory,
            &self.dispatcher,
            &mut self.console,
            &mut self.disk,
            &mut *self.host,
            &mut self.port_bus,
        )
    }

    pub fn instructions_executed(&self) -> u64 {
        self.driver.instructions_executed()
    }
}

/// Non-default emulator options.
pub struct EmulatorBuilder {
    version: (u8, u8),
    batch_size: u32,
    host: Option<Box<dyn HostIo>>,
    strict_io: bool,
    debug: bool,
    blocking_allowed: bool,
    trace: Option<Box<dyn std::io::Write>>,
}

impl EmulatorBuilder {
    pub fn new() -> EmulatorBuilder {
        EmulatorBuilder {
            version: DEFAULT_VERSION,
            batch_size: DEFAULT_BATCH_SIZE,
            host: None,
            strict_io: false,
            debug: false,
            blocking_allowed: true,
            trace: None,
        }
    }

    /// Sets the firmware major/minor version stamped into the identification block.
    pub fn with_version(mut self, major: u8, minor: u8) -> Self {
        self.version = (major, minor);
        self
    }

    /// Sets the per-[`Emulator::run_batch`] instruction budget.
    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Supplies the host capability bundle. Defaults to [`hostio::NativeHostIo`] on native
    /// targets.
    pub fn with_host(mut self, host: impl HostIo + 'static) -> Self {
        self.host = Some(Box::new(host));
        self
    }

    /// Rejects accesses to unrecognized ports instead of the default read-0xFF/drop-write policy
    /// (§6's `--strict-io`).
    pub fn with_strict_io(mut self, strict_io: bool) -> Self {
        self.strict_io = strict_io;
        self
    }

    /// Whether the host can leave a console-input call unfinished and retry it later (§9). See
    /// [`ExecutionDriver::with_blocking_allowed`].
    pub fn with_blocking_allowed(mut self, blocking_allowed: bool) -> Self {
        self.blocking_allowed = blocking_allowed;
        self
    }

    /// Raises diagnostic verbosity (§3.1's debug flag): with a trace sink attached, each trap and
    /// `HALT` is logged to it.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// A host-supplied sink that receives one line per executed trap and per `HALT` when the
    /// debug flag is set.
    pub fn with_trace_sink(mut self, sink: impl std::io::Write + 'static) -> Self {
        self.trace = Some(Box::new(sink));
        self
    }

    pub fn build(self) -> Emulator {
        let (major, minor) = self.version;

        let mut driver = ExecutionDriver::new()
            .with_strict_io(self.strict_io)
            .with_blocking_allowed(self.blocking_allowed)
            .with_debug(self.debug);
        if let Some(trace) = self.trace {
            driver = driver.with_trace_sink(trace);
        }

        Emulator {
            memory: Rc::new(RefCell::new(BankedMemory::new())),
            console: ConsolePort::new(),
            disk: DiskService::new(),
            dispatcher: Dispatcher::new(major, minor),
            driver,
            host: self.host.unwrap_or_else(default_host),
            port_bus: PortBus::new(),
            batch_size: self.batch_size,
        }
    }
}

impl Default for EmulatorBuilder {
    fn default() -> Self {
        EmulatorBuilder::new()
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn default_host() -> Box<dyn HostIo> {
    Box::new(hostio::NativeHostIo)
}

#[cfg(target_arch = "wasm32")]
fn default_host() -> Box<dyn HostIo> {
    Box::new(hostio::WasmHostIo::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::test_double::ScriptedCore;
    use crate::cpu::StepOutcome;
    use crate::driver::BatchOutcome;

    #[test]
    fn load_rom_stamps_identification_block() {
        let mut emulator = Emulator::builder().build();
        emulator.load_rom(&[0u8; memory::hcb::HCB_SIZE]);

        let memory = emulator.memory.borrow();
        assert_eq!(memory.fetch(memory::hcb::IDENT_ADDR_1), 0x57);
    }

    #[test]
    fn run_batch_executes_against_supplied_core() {
        let mut emulator = Emulator::builder().with_batch_size(3).build();
        emulator.load_rom(&[0u8; memory::hcb::HCB_SIZE]);

        let mut core = ScriptedCore::new(vec![StepOutcome::Normal]);
        core.set_pc(0x2000);
        let outcome = emulator.run_batch(&mut core);

        assert_eq!(outcome, BatchOutcome::BudgetExhausted);
        assert_eq!(emulator.instructions_executed(), 3);
    }

    #[test]
    fn queued_input_is_visible_to_a_cio_in_call() {
        let mut emulator = Emulator::builder().build();
        emulator.load_rom(&[0u8; memory::hcb::HCB_SIZE]);
        emulator.queue_input(b'A');

        let mut core = ScriptedCore::default();
        core.set_pc(hbios::HBIOS_ENTRY_VECTOR);
        core.set_sp(0xFFFE);
        {
            let mut memory = emulator.memory.borrow_mut();
            memory.store_word(0xFFFE, 0x1200);
        }
        core.set_b(hbios::function::CIO_IN);

        emulator.run_batch(&mut core);
        assert_eq!(core.get_c(), b'A');
    }

    #[test]
    fn memory_disk_unit_is_immediately_loaded() {
        let mut emulator = Emulator::builder().build();
        emulator
            .load_memory_disk(2, false, 0, disk::COMBO_SLICE_SIZE)
            .unwrap();

        assert!(emulator.disk.is_loaded(2));
    }

    #[test]
    fn rom_load_auto_synthesizes_enabled_memory_disks() {
        let mut rom = vec![0u8; memory::hcb::HCB_SIZE];
        rom[memory::hcb::MEMORY_DISK_CONFIG_OFFSET as usize] =
            memory::hcb::MEMORY_DISK_MD0_ENABLED;

        let mut emulator = Emulator::builder().build();
        emulator.load_rom(&rom);

        assert!(emulator.disk.is_loaded(memory::hcb::MD0_UNIT));
        assert!(!emulator.disk.is_loaded(memory::hcb::MD1_UNIT));

        let memory = emulator.memory.borrow();
        assert_eq!(
            memory.fetch(
                memory::hcb::HCB_BASE
                    + memory::hcb::DISK_UNIT_TABLE_OFFSET
                    + memory::hcb::MD0_UNIT as u16
            ),
            0x01
        );
    }

    #[test]
    fn loading_a_disk_refreshes_the_unit_table() {
        let mut emulator = Emulator::builder().build();
        emulator.load_rom(&[0u8; memory::hcb::HCB_SIZE]);
        emulator.load_disk(0, vec![0u8; disk::SINGLE_IMAGE_SIZE]).unwrap();

        let memory = emulator.memory.borrow();
        assert_eq!(
            memory.fetch(memory::hcb::HCB_BASE + memory::hcb::DISK_UNIT_TABLE_OFFSET),
            0x01
        );
    }
}
