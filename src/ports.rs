//! Port-mapped I/O, realized as driver-side opcode interception (§6, §9 "Port-I/O interception
//! vs delegate").
//!
//! A core that implements [`crate::cpu::PortIo`] handles `IN`/`OUT` itself; a core that doesn't
//! gets these six ports serviced here instead, recognized by the execution driver ahead of
//! `execute_one` by peeking the two port opcodes directly off the instruction stream rather than
//! asking the core to decode anything.

use crate::console::ConsolePort;
use crate::cpu::Z80Core;
use crate::disk::DiskService;
use crate::hbios::Dispatcher;
use crate::hostio::HostIo;
use crate::memory::BankedMemory;

/// `IN A,(n)`.
pub const OPCODE_IN: u8 = 0xDB;
/// `OUT (n),A`.
pub const OPCODE_OUT: u8 = 0xD3;

pub const PORT_UART_DATA: u8 = 0x68;
pub const PORT_UART_STATUS: u8 = 0x6D;
pub const PORT_BANK_SELECT_READ: u8 = 0x78;
pub const PORT_BANK_SELECT_WRITE: u8 = 0x7C;
pub const PORT_SIGNAL: u8 = 0xEE;
pub const PORT_HBIOS_DISPATCH: u8 = 0xEF;

const UART_STATUS_INPUT_READY: u8 = 0x01;
const UART_STATUS_OUTPUT_EMPTY: u8 = 0x20;

/// The driver-side port table: UART passthrough to the console port, bank-select passthrough to
/// the banked memory, the emulator-signal no-op (its semantics beyond that are an open question
/// per §9, so writes are only counted), and the HBIOS port-dispatch alternate call path.
#[derive(Debug, Default)]
pub struct PortBus {
    signal_writes: u32,
}

impl PortBus {
    pub fn new() -> Self {
        PortBus::default()
    }

    /// Writes observed to the emulator-signal port, for diagnostics only.
    pub fn signal_writes(&self) -> u32 {
        self.signal_writes
    }

    /// Services `IN A,(port)`. `None` means the port isn't recognized; the caller applies the
    /// unknown-port policy (read as 0xFF, or reject under `--strict-io`).
    pub fn read(&self, port: u8, memory: &BankedMemory, console: &mut ConsolePort) -> Option<u8> {
        match port {
            PORT_UART_DATA => Some(console.read_char().unwrap_or(0)),
            PORT_UART_STATUS => {
                let mut status = UART_STATUS_OUTPUT_EMPTY;
                if console.has_input() {
                    status |= UART_STATUS_INPUT_READY;
                }
                Some(status)
            }
            PORT_BANK_SELECT_READ => Some(memory.get_current_bank()),
            _ => None,
        }
    }

    /// Services `OUT (port),A`. Returns `true` if the port was recognized.
    #[allow(clippy::too_many_arguments)]
    pub fn write(
        &mut self,
        port: u8,
        value: u8,
        core: &mut dyn Z80Core,
        memory: &mut BankedMemory,
        console: &mut ConsolePort,
        disk: &mut DiskService,
        dispatcher: &Dispatcher,
        host: &mut dyn HostIo,
    ) -> bool {
        match port {
            PORT_UART_DATA => {
                console.write_char(value);
                true
            }
            PORT_BANK_SELECT_WRITE => {
                memory.select_bank(value);
                true
            }
            PORT_SIGNAL => {
                self.signal_writes += 1;
                true
            }
            PORT_HBIOS_DISPATCH => {
                // `OUT (0xEF),A` has already consumed its two opcode bytes by the time this call
                // happens, so there's no PC left to hold the call site open on: always treat it
                // as non-blocking here and let the PC-trap entry vector carry the waiting-for-
                // input path instead.
                let _ = dispatcher.service_call(core, memory, console, disk, host, true);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::test_double::ScriptedCore;
    use crate::hostio::NativeHostIo;
    use crate::memory::hcb;

    #[test]
    fn bank_select_port_round_trips_through_memory() {
        let mut memory = BankedMemory::new();
        memory.enable_banking();
        let mut console = ConsolePort::new();
        let mut disk = DiskService::new();
        let mut host = NativeHostIo;
        let dispatcher = Dispatcher::new(3, 0);
        let mut core = ScriptedCore::default();
        let mut bus = PortBus::new();

        assert!(bus.write(
            PORT_BANK_SELECT_WRITE,
            0x05,
            &mut core,
            &mut memory,
            &mut console,
            &mut disk,
            &dispatcher,
            &mut host,
        ));

        assert_eq!(bus.read(PORT_BANK_SELECT_READ, &memory, &mut console), Some(0x05));
    }

    #[test]
    fn uart_status_reports_input_ready_bit() {
        let memory = BankedMemory::new();
        let mut console = ConsolePort::new();
        let bus = PortBus::new();

        assert_eq!(
            bus.read(PORT_UART_STATUS, &memory, &mut console),
            Some(UART_STATUS_OUTPUT_EMPTY)
        );

        console.queue_char(b'x');
        assert_eq!(
            bus.read(PORT_UART_STATUS, &memory, &mut console),
            Some(UART_STATUS_OUTPUT_EMPTY | UART_STATUS_INPUT_READY)
        );
    }

    #[test]
    fn uart_data_port_reads_and_writes_console() {
        let memory = BankedMemory::new();
        let mut console = ConsolePort::new();
        let mut disk = DiskService::new();
        let mut host = NativeHostIo;
        let dispatcher = Dispatcher::new(3, 0);
        let mut core = ScriptedCore::default();
        let mut bus = PortBus::new();
        let mut write_memory = BankedMemory::new();

        console.queue_char(b'Q');
        assert_eq!(bus.read(PORT_UART_DATA, &memory, &mut console), Some(b'Q'));

        assert!(bus.write(
            PORT_UART_DATA,
            b'R',
            &mut core,
            &mut write_memory,
            &mut console,
            &mut disk,
            &dispatcher,
            &mut host,
        ));
        assert_eq!(console.drain_output(), vec![b'R']);
    }

    #[test]
    fn signal_port_is_a_counted_no_op() {
        let mut memory = BankedMemory::new();
        let mut console = ConsolePort::new();
        let mut disk = DiskService::new();
        let mut host = NativeHostIo;
        let dispatcher = Dispatcher::new(3, 0);
        let mut core = ScriptedCore::default();
        let mut bus = PortBus::new();

        bus.write(
            PORT_SIGNAL,
            0x01,
            &mut core,
            &mut memory,
            &mut console,
            &mut disk,
            &dispatcher,
            &mut host,
        );

        assert_eq!(bus.signal_writes(), 1);
    }

    #[test]
    fn hbios_dispatch_port_runs_the_same_service_as_a_pc_trap() {
        let mut memory = BankedMemory::new();
        memory.enable_banking();
        let dispatcher = Dispatcher::new(3, 0);
        dispatcher.bring_up(&mut memory, &vec![0u8; hcb::HCB_SIZE]);

        let mut console = ConsolePort::new();
        let mut disk = DiskService::new();
        let mut host = NativeHostIo;
        let mut core = ScriptedCore::default();
        core.set_b(crate::hbios::function::CIO_STATUS);
        let mut bus = PortBus::new();

        bus.write(
            PORT_HBIOS_DISPATCH,
            0,
            &mut core,
            &mut memory,
            &mut console,
            &mut disk,
            &dispatcher,
            &mut host,
        );

        assert_eq!(core.get_a(), 0x00);
    }
}
