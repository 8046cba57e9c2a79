//! The HBIOS interception engine.
//!
//! RomWBW firmware calls into its Hardware BIOS through a single fixed entry vector, with a
//! function code in `B` and arguments in the remaining registers (§4.2). Rather than decode and
//! execute the vendor driver code living at that address, the dispatcher recognizes the trapped
//! PC, performs the equivalent service directly against this crate's own memory, disk, and
//! console state, writes results back into the guest's registers, and returns control to the
//! address on top of the Z80 stack — precisely as if the real driver had run and executed `RET`.

pub mod function;

use std::collections::HashMap;

use lazy_static::lazy_static;
use log::{trace, warn};
use num_enum::IntoPrimitive;

use crate::console::ConsolePort;
use crate::cpu::Z80Core;
use crate::disk::{DiskError, DiskService, SECTOR_SIZE};
use crate::hostio::{HostIo, ResetKind};
use crate::memory::{hcb, BankedMemory, Memory};

/// Why the driver is looking at a given PC: an HBIOS call, or a bring-up vector (warm/cold boot)
/// the dispatcher services the same way it services a reset request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapKind {
    Call,
    WarmBoot,
    ColdBoot,
}

/// The fixed address firmware calls into for every HBIOS service.
pub const HBIOS_ENTRY_VECTOR: u16 = 0xFFF0;

/// The address RomWBW jumps to on a warm boot (re-enter CP/M without reloading the OS image).
pub const WARM_BOOT_VECTOR: u16 = 0x0000;

/// The address RomWBW jumps to on a cold boot (full reload).
pub const COLD_BOOT_VECTOR: u16 = 0xFFF6;

lazy_static! {
    static ref TRAP_TABLE: HashMap<u16, TrapKind> = {
        let mut table = HashMap::new();
        table.insert(HBIOS_ENTRY_VECTOR, TrapKind::Call);
        table.insert(WARM_BOOT_VECTOR, TrapKind::WarmBoot);
        table.insert(COLD_BOOT_VECTOR, TrapKind::ColdBoot);
        table
    };
}

/// Status byte the dispatcher writes back into register `A` on return, per §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive)]
#[repr(u8)]
pub enum StatusCode {
    Success = 0x00,
    InvalidUnit = 0x01,
    NotReady = 0x02,
    Timeout = 0x03,
    Unsupported = 0xFE,
}

impl From<DiskError> for StatusCode {
    fn from(err: DiskError) -> Self {
        match err {
            DiskError::InvalidUnit(_) => StatusCode::InvalidUnit,
            DiskError::NotLoaded(_) => StatusCode::NotReady,
            DiskError::OutOfBounds { .. } => StatusCode::InvalidUnit,
            DiskError::UnrecognizedFormat { .. } => StatusCode::InvalidUnit,
        }
    }
}

/// The HBIOS identification signature reported by [`Dispatcher::service_sys_ident`] — the
/// function-code-level counterpart to [`hcb::install_ident`]'s stamp.
const IDENT_SIGNATURE: u8 = 0x57;
/// CPU type code reported by [`Dispatcher::service_sys_cpu_info`]: there is only ever one CPU on
/// this machine.
const CPU_TYPE_Z80: u8 = 0x00;
/// Nominal clock speed, in MHz, reported by [`Dispatcher::service_sys_cpu_info`].
const CPU_SPEED_MHZ: u8 = 10;
/// Longest filename `read_cstring` will follow before giving up, guarding against a guest pointer
/// into memory with no terminating NUL.
const MAX_FILENAME_LEN: usize = 128;

/// What [`Dispatcher::dispatch`] did with a given PC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// `pc` wasn't a recognized trap; the driver should fall through to [`Z80Core::execute_one`].
    NotTrapped,
    /// The trap was serviced and control returned to the caller (or, for a bank switch,
    /// transferred directly).
    Handled,
    /// The trap was an HBIOS call that can't complete yet (console input requested with none
    /// queued, in a deployment that can't block for it). PC is left untouched so the same
    /// instruction re-attempts the call once the host supplies input.
    Waiting,
}

/// What [`Dispatcher::service_call`] did, before the PC-trap return convention is applied.
pub(crate) enum ServiceOutcome {
    /// The function completed; `status` is the byte that belongs in register `A`.
    Completed(StatusCode),
    /// The function can't complete yet; no registers were written.
    Waiting,
    /// The function already transferred control itself ([`function::SYS_BANK_SWITCH`]) and must
    /// not go through the normal pop-and-jump trap return.
    Transferred,
}

/// What [`Dispatcher::service_cio_in`] did.
enum CioInOutcome {
    Byte(StatusCode),
    Waiting,
}

/// The dispatcher: stateless apart from the firmware's declared major/minor version, which it
/// stamps into the identification block on bring-up.
pub struct Dispatcher {
    version_major: u8,
    version_minor: u8,
}

impl Dispatcher {
    pub fn new(version_major: u8, version_minor: u8) -> Self {
        Dispatcher {
            version_major,
            version_minor,
        }
    }

    /// Returns the trap kind for `pc`, if any. The driver consults this before calling
    /// [`crate::cpu::Z80Core::execute_one`]: a hit means the dispatcher services the call instead.
    pub fn trap_kind(pc: u16) -> Option<TrapKind> {
        TRAP_TABLE.get(&pc).copied()
    }

    /// Performs first-boot bring-up: installs the HCB template, stamps the identification block,
    /// and arms bank projection. Idempotent (§8).
    pub fn bring_up(&self, memory: &mut BankedMemory, rom_image: &[u8]) {
        memory.enable_banking();
        hcb::install_hcb(memory, rom_image);
        hcb::install_ident(memory, self.version_major, self.version_minor);
    }

    /// Services a trapped PC. See [`DispatchOutcome`] for what the driver should do with the
    /// result. `blocking_allowed` is the deployment's ability to leave a call unfinished and
    /// retry it later (§9); native/CLI hosts pass `true`, the browser bindings pass `false`.
    #[allow(clippy::too_many_arguments)]
    pub fn dispatch(
        &self,
        pc: u16,
        core: &mut dyn Z80Core,
        memory: &mut BankedMemory,
        console: &mut ConsolePort,
        disk: &mut DiskService,
        host: &mut dyn HostIo,
        blocking_allowed: bool,
    ) -> DispatchOutcome {
        match Self::trap_kind(pc) {
            Some(TrapKind::Call) => {
                match self.service_call(core, memory, console, disk, host, blocking_allowed) {
                    ServiceOutcome::Completed(_) => {
                        self.return_to_caller(core, memory);
                        DispatchOutcome::Handled
                    }
                    ServiceOutcome::Transferred => DispatchOutcome::Handled,
                    ServiceOutcome::Waiting => DispatchOutcome::Waiting,
                }
            }
            Some(TrapKind::WarmBoot) => {
                host.reset(ResetKind::Warm);
                DispatchOutcome::Handled
            }
            Some(TrapKind::ColdBoot) => {
                host.reset(ResetKind::Cold);
                DispatchOutcome::Handled
            }
            None => DispatchOutcome::NotTrapped,
        }
    }

    fn return_to_caller(&self, core: &mut dyn Z80Core, memory: &mut BankedMemory) {
        let return_address = core.pop(&*memory);
        core.set_pc(return_address);
    }

    /// Runs the function dispatch and status write-back that a PC-trapped HBIOS call performs,
    /// without the return-address pop (§4.3 step 5) that only applies to the call/ret trap. The
    /// HBIOS port-dispatch port (0xEF, [`crate::ports::PortBus`]) reuses this directly as its
    /// alternate call path, per §6.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn service_call(
        &self,
        core: &mut dyn Z80Core,
        memory: &mut BankedMemory,
        console: &mut ConsolePort,
        disk: &mut DiskService,
        host: &mut dyn HostIo,
        blocking_allowed: bool,
    ) -> ServiceOutcome {
        let func = core.get_b();

        if func == function::SYS_BANK_SWITCH {
            self.service_sys_bank_switch(core, memory);
            trace!("HBIOS func 0x{:02X} -> bank switch, pc=0x{:04X}", func, core.get_pc());
            return ServiceOutcome::Transferred;
        }

        if func == function::CIO_IN {
            return match self.service_cio_in(core, console, blocking_allowed) {
                CioInOutcome::Byte(status) => {
                    let status_byte = u8::from(status);
                    core.set_a(status_byte);
                    trace!("HBIOS func 0x{:02X} -> status 0x{:02X}", func, status_byte);
                    ServiceOutcome::Completed(status)
                }
                CioInOutcome::Waiting => {
                    trace!("HBIOS func 0x{:02X} -> waiting for input", func);
                    ServiceOutcome::Waiting
                }
            };
        }

        let status = match func {
            function::CIO_OUT => self.service_cio_out(core, console),
            function::CIO_STATUS => self.service_cio_status(core, &*console),
            function::DIO_SELECT => self.service_dio_select(core, &*disk),
            function::DIO_SEEK => self.service_dio_seek(core, disk),
            function::DIO_READ => self.service_dio_read(core, memory, disk),
            function::DIO_WRITE => self.service_dio_write(core, &*memory, disk),
            function::DIO_CAPACITY => self.service_dio_capacity(core, &*disk),
            function::DIO_STATUS => self.service_dio_media_status(core, &*disk),
            function::SYS_RESET => self.service_sys_reset(core, host),
            function::SYS_TIME_GET => self.service_sys_time_get(core, &*host),
            function::SYS_IDENT => self.service_sys_ident(core),
            function::SYS_CPU_INFO => self.service_sys_cpu_info(core),
            function::SYSINT => self.service_sysint(core, memory, host),
            other => {
                warn!("unrecognized HBIOS function code 0x{:02X}", other);
                StatusCode::Unsupported
            }
        };

        let status_byte = u8::from(status);
        core.set_a(status_byte);
        trace!("HBIOS func 0x{:02X} -> status 0x{:02X}", func, status_byte);
        ServiceOutcome::Completed(status)
    }

    /// Per §7: for console input, a deployment that can't block for a byte that isn't queued yet
    /// raises the waiting-for-input outcome instead of an error status. A deployment that can
    /// block (native/CLI) keeps the old behavior of reporting `NotReady` and letting the firmware
    /// poll again.
    fn service_cio_in(
        &self,
        core: &mut dyn Z80Core,
        console: &mut ConsolePort,
        blocking_allowed: bool,
    ) -> CioInOutcome {
        match console.read_char() {
            Some(byte) => {
                core.set_c(byte);
                CioInOutcome::Byte(StatusCode::Success)
            }
            None if blocking_allowed => CioInOutcome::Byte(StatusCode::NotReady),
            None => CioInOutcome::Waiting,
        }
    }

    fn service_cio_out(&self, core: &mut dyn Z80Core, console: &mut ConsolePort) -> StatusCode {
        console.write_char(core.get_c());
        StatusCode::Success
    }

    fn service_cio_status(&self, core: &mut dyn Z80Core, console: &ConsolePort) -> StatusCode {
        core.set_c(if console.has_input() { 0xFF } else { 0x00 });
        StatusCode::Success
    }

    /// Validates that `unit` (in `C`) names a loaded unit. Exists for firmware written against
    /// HBIOS's historical unit-select convention; every disk call in this dispatcher already
    /// carries its own unit, so there's no default-unit state to actually set.
    fn service_dio_select(&self, core: &mut dyn Z80Core, disk: &DiskService) -> StatusCode {
        let unit = core.get_c() as usize;
        match disk.get(unit) {
            Ok(_) => StatusCode::Success,
            Err(err) => err.into(),
        }
    }

    fn service_dio_seek(&self, core: &mut dyn Z80Core, disk: &mut DiskService) -> StatusCode {
        let unit = core.get_c() as usize;
        let slice = core.get_d() as u32;
        let lba = core.hl() as u32;

        match disk.seek(unit, slice, lba) {
            Ok(()) => StatusCode::Success,
            Err(err) => err.into(),
        }
    }

    fn service_dio_read(
        &self,
        core: &mut dyn Z80Core,
        memory: &mut dyn Memory,
        disk: &mut DiskService,
    ) -> StatusCode {
        let unit = core.get_c() as usize;
        let dest = core.hl();

        let mut sector = [0u8; SECTOR_SIZE];
        match disk.read(unit, &mut sector) {
            Ok(()) => {
                for (i, byte) in sector.iter().enumerate() {
                    memory.store(dest.wrapping_add(i as u16), *byte);
                }
                StatusCode::Success
            }
            Err(err) => err.into(),
        }
    }

    fn service_dio_write(
        &self,
        core: &mut dyn Z80Core,
        memory: &dyn Memory,
        disk: &mut DiskService,
    ) -> StatusCode {
        let unit = core.get_c() as usize;
        let src = core.hl();

        let mut sector = [0u8; SECTOR_SIZE];
        for (i, byte) in sector.iter_mut().enumerate() {
            *byte = memory.fetch(src.wrapping_add(i as u16));
        }

        match disk.write(unit, &sector) {
            Ok(()) => StatusCode::Success,
            Err(err) => err.into(),
        }
    }

    /// Reports slice count (`D`) and sectors per slice (`HL`) for the unit in `C`.
    fn service_dio_capacity(&self, core: &mut dyn Z80Core, disk: &DiskService) -> StatusCode {
        let unit = core.get_c() as usize;
        match disk.get(unit) {
            Ok(slot) => match slot.geometry() {
                Some((slice_count, sectors_per_slice)) => {
                    core.set_d(slice_count as u8);
                    core.set_hl(sectors_per_slice as u16);
                    StatusCode::Success
                }
                None => StatusCode::NotReady,
            },
            Err(err) => err.into(),
        }
    }

    /// Reports whether the unit in `C` has a medium loaded.
    fn service_dio_media_status(&self, core: &mut dyn Z80Core, disk: &DiskService) -> StatusCode {
        let unit = core.get_c() as usize;
        if disk.is_loaded(unit) {
            StatusCode::Success
        } else {
            StatusCode::NotReady
        }
    }

    fn service_sys_reset(&self, core: &mut dyn Z80Core, host: &mut dyn HostIo) -> StatusCode {
        host.reset(ResetKind::from(core.get_c()));
        StatusCode::Success
    }

    fn service_sys_time_get(&self, core: &mut dyn Z80Core, host: &dyn HostIo) -> StatusCode {
        let clock = host.now();
        core.set_b(bcd(clock.year.rem_euclid(100) as u8));
        core.set_c(bcd(clock.month));
        core.set_d(bcd(clock.day));
        core.set_e(bcd(clock.hour));
        core.set_h(bcd(clock.minute));
        core.set_l(bcd(clock.second));
        StatusCode::Success
    }

    /// Reports the function-code-level identification signature (`C`) and firmware major/minor
    /// version (`D`/`E`) — distinct from [`hcb::install_ident`]'s memory-resident stamp.
    fn service_sys_ident(&self, core: &mut dyn Z80Core) -> StatusCode {
        core.set_c(IDENT_SIGNATURE);
        core.set_d(self.version_major);
        core.set_e(self.version_minor);
        StatusCode::Success
    }

    /// Reports a CPU type code (`C`) and nominal clock speed in MHz (`D`). There's only one CPU
    /// type this machine ever reports, since the decoder living on the other side of
    /// [`crate::cpu::Z80Core`] is always a Z80.
    fn service_sys_cpu_info(&self, core: &mut dyn Z80Core) -> StatusCode {
        core.set_c(CPU_TYPE_Z80);
        core.set_d(CPU_SPEED_MHZ);
        StatusCode::Success
    }

    /// Selects the bank named in `A` and transfers control directly to the address in `HL`,
    /// bypassing the normal pop-and-jump trap return entirely (§4.3). The caller
    /// ([`Self::service_call`]) must not apply the usual return-address pop on top of this.
    fn service_sys_bank_switch(&self, core: &mut dyn Z80Core, memory: &mut BankedMemory) {
        let bank = core.get_a();
        let target = core.hl();
        memory.select_bank(bank);
        core.set_pc(target);
    }

    /// Dispatches one of the `SYSINT` subfunctions, selected by register `C`.
    fn service_sysint(
        &self,
        core: &mut dyn Z80Core,
        memory: &mut BankedMemory,
        host: &mut dyn HostIo,
    ) -> StatusCode {
        match core.get_c() {
            function::sysint::INTINF => {
                core.set_d(self.version_major);
                core.set_e(self.version_minor);
                StatusCode::Success
            }
            function::sysint::INTGET | function::sysint::INTGETB => {
                self.service_sysint_get(core, memory, &*host)
            }
            function::sysint::INTPUT | function::sysint::INTPUTB => {
                self.service_sysint_put(core, memory, host)
            }
            _ => StatusCode::Unsupported,
        }
    }

    /// `INTGET`/`INTGETB`: reads the whole host file named by the NUL-terminated string at `DE`
    /// into the guest buffer at `HL`, capped at `BC` bytes, and reports the transferred length
    /// back in `HL` (§6).
    fn service_sysint_get(
        &self,
        core: &mut dyn Z80Core,
        memory: &mut BankedMemory,
        host: &dyn HostIo,
    ) -> StatusCode {
        let name = read_cstring(memory, core.de());
        let buffer = core.hl();
        let max_len = core.bc() as usize;

        match host.read_host_file(&name) {
            Ok(data) => {
                let len = data.len().min(max_len);
                for (i, byte) in data[..len].iter().enumerate() {
                    memory.store(buffer.wrapping_add(i as u16), *byte);
                }
                core.set_hl(len as u16);
                StatusCode::Success
            }
            Err(_) => StatusCode::Unsupported,
        }
    }

    /// `INTPUT`/`INTPUTB`: writes `BC` bytes from the guest buffer at `HL` to the host file named
    /// by the NUL-terminated string at `DE`, and reports the transferred length back in `HL`.
    fn service_sysint_put(
        &self,
        core: &mut dyn Z80Core,
        memory: &mut BankedMemory,
        host: &mut dyn HostIo,
    ) -> StatusCode {
        let name = read_cstring(memory, core.de());
        let buffer = core.hl();
        let len = core.bc() as usize;

        let data: Vec<u8> = (0..len)
            .map(|i| memory.fetch(buffer.wrapping_add(i as u16)))
            .collect();

        match host.write_host_file(&name, &data) {
            Ok(()) => {
                core.set_hl(len as u16);
                StatusCode::Success
            }
            Err(_) => StatusCode::Unsupported,
        }
    }
}

/// Encodes a value in the 0..=99 range as packed BCD, the convention HBIOS time fields use.
fn bcd(value: u8) -> u8 {
    let value = value % 100;
    ((value / 10) << 4) | (value % 10)
}

/// Reads a NUL-terminated string out of guest memory starting at `addr`, per the `SYSINT`
/// filename convention (§6). Stops at [`MAX_FILENAME_LEN`] bytes even without a terminator, since
/// a guest pointer with no NUL would otherwise read forever.
fn read_cstring(memory: &dyn Memory, addr: u16) -> String {
    let mut bytes = Vec::with_capacity(MAX_FILENAME_LEN);
    let mut cursor = addr;

    for _ in 0..MAX_FILENAME_LEN {
        let byte = memory.fetch(cursor);
        if byte == 0 {
            break;
        }
        bytes.push(byte);
        cursor = cursor.wrapping_add(1);
    }

    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::test_double::ScriptedCore;
    use crate::hostio::NativeHostIo;

    fn rom_image() -> Vec<u8> {
        vec![0u8; hcb::HCB_SIZE]
    }

    #[test]
    fn trap_table_recognizes_entry_vector() {
        assert_eq!(Dispatcher::trap_kind(HBIOS_ENTRY_VECTOR), Some(TrapKind::Call));
        assert_eq!(Dispatcher::trap_kind(0x1234), None);
    }

    #[test]
    fn cio_out_appends_to_console() {
        let dispatcher = Dispatcher::new(3, 0);
        let mut memory = BankedMemory::new();
        dispatcher.bring_up(&mut memory, &rom_image());

        let mut core = ScriptedCore::default();
        core.set_sp(0xFFFE);
        memory.store_word(0xFFFE, 0x1200);
        core.set_b(function::CIO_OUT);
        core.set_c(b'A');

        let mut console = ConsolePort::new();
        let mut disk = DiskService::new();
        let mut host = NativeHostIo;

        let outcome = dispatcher.dispatch(
            HBIOS_ENTRY_VECTOR, &mut core, &mut memory, &mut console, &mut disk, &mut host, true,
        );
        assert_eq!(outcome, DispatchOutcome::Handled);
        assert_eq!(console.drain_output(), vec![b'A']);
        assert_eq!(core.get_a(), StatusCode::Success as u8);
        assert_eq!(core.get_pc(), 0x1200);
    }

    #[test]
    fn cio_in_reports_not_ready_when_empty_and_blocking_allowed() {
        let dispatcher = Dispatcher::new(3, 0);
        let mut memory = BankedMemory::new();
        dispatcher.bring_up(&mut memory, &rom_image());

        let mut core = ScriptedCore::default();
        core.set_sp(0xFFFE);
        memory.store_word(0xFFFE, 0x1200);
        core.set_b(function::CIO_IN);

        let mut console = ConsolePort::new();
        let mut disk = DiskService::new();
        let mut host = NativeHostIo;

        let outcome = dispatcher.dispatch(
            HBIOS_ENTRY_VECTOR, &mut core, &mut memory, &mut console, &mut disk, &mut host, true,
        );
        assert_eq!(outcome, DispatchOutcome::Handled);
        assert_eq!(core.get_a(), StatusCode::NotReady as u8);
    }

    #[test]
    fn cio_in_raises_waiting_when_blocking_disallowed() {
        let dispatcher = Dispatcher::new(3, 0);
        let mut memory = BankedMemory::new();
        dispatcher.bring_up(&mut memory, &rom_image());

        let mut core = ScriptedCore::default();
        core.set_sp(0xFFFE);
        memory.store_word(0xFFFE, 0x1200);
        core.set_pc(HBIOS_ENTRY_VECTOR);
        core.set_b(function::CIO_IN);

        let mut console = ConsolePort::new();
        let mut disk = DiskService::new();
        let mut host = NativeHostIo;

        let outcome = dispatcher.dispatch(
            HBIOS_ENTRY_VECTOR, &mut core, &mut memory, &mut console, &mut disk, &mut host, false,
        );
        assert_eq!(outcome, DispatchOutcome::Waiting);
        // PC is left untouched so the driver re-attempts the same call.
        assert_eq!(core.get_pc(), HBIOS_ENTRY_VECTOR);
    }

    #[test]
    fn disk_read_populates_memory_at_hl() {
        let dispatcher = Dispatcher::new(3, 0);
        let mut memory = BankedMemory::new();
        dispatcher.bring_up(&mut memory, &rom_image());

        let mut image = vec![0u8; crate::disk::SINGLE_IMAGE_SIZE];
        image[0] = 0x99;

        let mut disk = DiskService::new();
        disk.load(0, image).unwrap();

        let mut core = ScriptedCore::default();
        core.set_sp(0xFFFE);
        memory.store_word(0xFFFE, 0x1200);
        core.set_b(function::DIO_READ);
        core.set_c(0); // unit
        core.set_hl(0x3000);

        let mut console = ConsolePort::new();
        let mut host = NativeHostIo;

        dispatcher.dispatch(
            HBIOS_ENTRY_VECTOR, &mut core, &mut memory, &mut console, &mut disk, &mut host, true,
        );

        assert_eq!(core.get_a(), StatusCode::Success as u8);
        assert_eq!(memory.fetch(0x3000), 0x99);
    }

    #[test]
    fn dio_seek_reads_unit_slice_and_lba_from_registers() {
        let dispatcher = Dispatcher::new(3, 0);
        let mut memory = BankedMemory::new();
        dispatcher.bring_up(&mut memory, &rom_image());

        let mut disk = DiskService::new();
        disk.load(0, vec![0u8; crate::disk::SINGLE_IMAGE_SIZE]).unwrap();

        let mut core = ScriptedCore::default();
        core.set_sp(0xFFFE);
        memory.store_word(0xFFFE, 0x1200);
        core.set_b(function::DIO_SEEK);
        core.set_c(0); // unit
        core.set_d(0); // slice
        core.set_hl(5); // lba

        let mut console = ConsolePort::new();
        let mut host = NativeHostIo;

        dispatcher.dispatch(
            HBIOS_ENTRY_VECTOR, &mut core, &mut memory, &mut console, &mut disk, &mut host, true,
        );

        assert_eq!(core.get_a(), StatusCode::Success as u8);
    }

    #[test]
    fn dio_capacity_reports_slice_count_and_sectors_per_slice() {
        let dispatcher = Dispatcher::new(3, 0);
        let mut memory = BankedMemory::new();
        dispatcher.bring_up(&mut memory, &rom_image());

        let mut disk = DiskService::new();
        disk.load(0, vec![0u8; crate::disk::SINGLE_IMAGE_SIZE]).unwrap();

        let mut core = ScriptedCore::default();
        core.set_sp(0xFFFE);
        memory.store_word(0xFFFE, 0x1200);
        core.set_b(function::DIO_CAPACITY);
        core.set_c(0);

        let mut console = ConsolePort::new();
        let mut host = NativeHostIo;

        dispatcher.dispatch(
            HBIOS_ENTRY_VECTOR, &mut core, &mut memory, &mut console, &mut disk, &mut host, true,
        );

        assert_eq!(core.get_a(), StatusCode::Success as u8);
        assert_eq!(core.get_d(), 1);
        assert_eq!(core.hl(), 16_384);
    }

    #[test]
    fn sys_ident_reports_signature_and_version() {
        let dispatcher = Dispatcher::new(3, 1);
        let mut memory = BankedMemory::new();
        dispatcher.bring_up(&mut memory, &rom_image());

        let mut core = ScriptedCore::default();
        core.set_sp(0xFFFE);
        memory.store_word(0xFFFE, 0x1200);
        core.set_b(function::SYS_IDENT);

        let mut console = ConsolePort::new();
        let mut disk = DiskService::new();
        let mut host = NativeHostIo;

        dispatcher.dispatch(
            HBIOS_ENTRY_VECTOR, &mut core, &mut memory, &mut console, &mut disk, &mut host, true,
        );

        assert_eq!(core.get_c(), IDENT_SIGNATURE);
        assert_eq!(core.get_d(), 3);
        assert_eq!(core.get_e(), 1);
    }

    #[test]
    fn sys_bank_switch_transfers_control_without_popping_the_stack() {
        let dispatcher = Dispatcher::new(3, 0);
        let mut memory = BankedMemory::new();
        dispatcher.bring_up(&mut memory, &rom_image());

        let mut core = ScriptedCore::default();
        core.set_sp(0xFFFE);
        memory.store_word(0xFFFE, 0x9999); // would be the wrong PC if popped
        core.set_b(function::SYS_BANK_SWITCH);
        core.set_a(0x83);
        core.set_hl(0x4000);

        let mut console = ConsolePort::new();
        let mut disk = DiskService::new();
        let mut host = NativeHostIo;

        let outcome = dispatcher.dispatch(
            HBIOS_ENTRY_VECTOR, &mut core, &mut memory, &mut console, &mut disk, &mut host, true,
        );

        assert_eq!(outcome, DispatchOutcome::Handled);
        assert_eq!(core.get_pc(), 0x4000);
        assert_eq!(core.get_sp(), 0xFFFE); // stack untouched
        assert_eq!(memory.get_current_bank(), 0x83);
    }

    #[test]
    fn unrecognized_function_reports_unsupported() {
        let dispatcher = Dispatcher::new(3, 0);
        let mut memory = BankedMemory::new();
        dispatcher.bring_up(&mut memory, &rom_image());

        let mut core = ScriptedCore::default();
        core.set_sp(0xFFFE);
        memory.store_word(0xFFFE, 0x1200);
        core.set_b(0x7F);

        let mut console = ConsolePort::new();
        let mut disk = DiskService::new();
        let mut host = NativeHostIo;

        dispatcher.dispatch(
            HBIOS_ENTRY_VECTOR, &mut core, &mut memory, &mut console, &mut disk, &mut host, true,
        );
        assert_eq!(core.get_a(), StatusCode::Unsupported as u8);
    }

    #[test]
    fn warm_boot_vector_triggers_host_reset_without_touching_registers() {
        let dispatcher = Dispatcher::new(3, 0);
        let mut memory = BankedMemory::new();
        dispatcher.bring_up(&mut memory, &rom_image());

        let mut core = ScriptedCore::default();
        let mut console = ConsolePort::new();
        let mut disk = DiskService::new();
        let mut host = NativeHostIo;

        let outcome = dispatcher.dispatch(
            WARM_BOOT_VECTOR, &mut core, &mut memory, &mut console, &mut disk, &mut host, true,
        );
        assert_eq!(outcome, DispatchOutcome::Handled);
    }
}
