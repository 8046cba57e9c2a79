//! HBIOS function codes, as carried in register `B` on entry to the trapped call vector.

/// Character input: blocks the caller's view of the console's input FIFO.
pub const CIO_IN: u8 = 0x00;
/// Character output: appends to the console's output buffer.
pub const CIO_OUT: u8 = 0x01;
/// Character input status: `C` is set non-zero if a byte is available.
pub const CIO_STATUS: u8 = 0x02;

/// Disk unit select: `C` names the unit that subsequent disk calls with no unit of their own
/// default to. Not required once every disk call carries its own unit in `C`, but kept for
/// firmware written against the narrower convention.
pub const DIO_SELECT: u8 = 0x13;
/// Disk seek: `C` is the unit, `D` the slice, `HL` the in-slice sector (lba). Selects the sector a
/// subsequent read or write operates on.
pub const DIO_SEEK: u8 = 0x10;
/// Disk read: copies one sector from the selected unit into memory at `HL`, then advances the
/// seek cursor.
pub const DIO_READ: u8 = 0x11;
/// Disk write: copies one sector from memory at `HL` to the selected unit, then advances the seek
/// cursor.
pub const DIO_WRITE: u8 = 0x12;
/// Disk capacity/geometry report: `C` is the unit; returns slice count in `D` and sectors per
/// slice in `HL`.
pub const DIO_CAPACITY: u8 = 0x14;
/// Disk media status: `C` is the unit; returns [`crate::hbios::StatusCode::Success`] if a medium
/// is loaded, [`crate::hbios::StatusCode::NotReady`] otherwise.
pub const DIO_STATUS: u8 = 0x15;

/// Requests a warm or cold reset, selected by `C` (see [`crate::hostio::ResetKind`]).
pub const SYS_RESET: u8 = 0xF0;
/// Reads the host wall clock into BCD-packed registers.
pub const SYS_TIME_GET: u8 = 0xF1;
/// System identification: reports the HBIOS identity signature in `A` and firmware major/minor
/// version in `D`/`E`.
pub const SYS_IDENT: u8 = 0xF2;
/// System CPU info: reports a CPU type code in `A` and nominal clock speed (MHz) in `C`.
pub const SYS_CPU_INFO: u8 = 0xF3;
/// System bank switch: `A` holds the bank value to select, `HL` the address to transfer control
/// to. Unlike every other function, this does not return to the caller through the normal
/// pop-and-jump trap return; PC is set directly to `HL` after the bank switch takes effect.
pub const SYS_BANK_SWITCH: u8 = 0xF4;

/// The multiplexed "system internal" family; the specific operation is carried in `C`.
pub const SYSINT: u8 = 0xF8;

/// Subfunctions of [`SYSINT`].
pub mod sysint {
    /// Reports firmware identity (major/minor version) into `D`/`E`.
    pub const INTINF: u8 = 0x00;
    /// Reads a whole host file by name (string-terminated argument, not modeled here).
    pub const INTGET: u8 = 0x01;
    /// Writes a whole host file by name.
    pub const INTPUT: u8 = 0x02;
    /// Reads a host file in binary mode.
    pub const INTGETB: u8 = 0x03;
    /// Writes a host file in binary mode.
    pub const INTPUTB: u8 = 0x04;
}
