//! The HBIOS Control Block (HCB) and the identification stamp.
//!
//! Both live in the common region (RAM bank 15) so that they are reachable regardless of the
//! current bank-select value, per §3 and §4.1.

use super::{BankedMemory, Memory};

/// Size (in bytes) of the HBIOS Control Block.
pub const HCB_SIZE: usize = 512;

/// Offset of the HCB within the common bank (it resides at the start of bank 15).
pub const HCB_BASE: u16 = 0x8000;

/// Offset of the API-type byte within the HCB.
pub const API_TYPE_OFFSET: u16 = 0x112;

/// The API-type value the loader forces regardless of what the ROM header contains.
pub const API_TYPE_HBIOS: u8 = 0x01;

/// Offset within the HCB of the disk-unit table the dispatcher populates so the RomWBW boot
/// loader's discovery routine can enumerate units.
pub const DISK_UNIT_TABLE_OFFSET: u16 = 0x120;

/// Maximum number of disk units the table can describe.
pub const MAX_UNITS: usize = 16;

/// Offset within the HCB of the memory-disk configuration byte, read once at ROM load to decide
/// which synthesized memory-disk units to bring up (§4.3).
pub const MEMORY_DISK_CONFIG_OFFSET: u16 = 0x130;

/// Set in the memory-disk configuration byte if the RAM-disk unit (MD0) should be synthesized.
pub const MEMORY_DISK_MD0_ENABLED: u8 = 0x01;

/// Set in the memory-disk configuration byte if the ROM-disk unit (MD1) should be synthesized.
pub const MEMORY_DISK_MD1_ENABLED: u8 = 0x02;

/// Unit index the RAM-disk (MD0) is synthesized at.
pub const MD0_UNIT: usize = 14;

/// Unit index the ROM-disk (MD1) is synthesized at.
pub const MD1_UNIT: usize = 15;

/// The first common-region address holding the identification stamp.
pub const IDENT_ADDR_1: u16 = 0xFE00;

/// The second common-region address holding the identification stamp (mirrors the first).
pub const IDENT_ADDR_2: u16 = 0xFF00;

/// Address holding the little-endian pointer to the identification stamp.
pub const IDENT_POINTER_ADDR: u16 = 0xFFFC;

const IDENT_SIGNATURE: u8 = 0x57; // 'W'
const IDENT_SIGNATURE_COMPLEMENT: u8 = !IDENT_SIGNATURE;

/// Copies the first [`HCB_SIZE`] bytes of `rom_image` into the start of common RAM (bank 15),
/// then forces the API-type byte to [`API_TYPE_HBIOS`].
///
/// This must run before [`install_ident`] and before the dispatcher writes the disk-unit table,
/// since both live inside the same 512-byte region.
pub fn install_hcb(memory: &mut BankedMemory, rom_image: &[u8]) {
    let template = &rom_image[..rom_image.len().min(HCB_SIZE)];

    for (i, byte) in template.iter().enumerate() {
        memory.store(HCB_BASE + i as u16, *byte);
    }

    memory.store(HCB_BASE + API_TYPE_OFFSET, API_TYPE_HBIOS);
}

/// Writes the disk-unit table inside the HCB, one byte per slot: `0x01` if `units[i]` is loaded,
/// `0x00` otherwise. Idempotent: re-running with the same `units` leaves the table unchanged.
pub fn write_disk_unit_table(memory: &mut BankedMemory, units: &[bool; MAX_UNITS]) {
    for (i, loaded) in units.iter().enumerate() {
        memory.store(
            HCB_BASE + DISK_UNIT_TABLE_OFFSET + i as u16,
            if *loaded { 0x01 } else { 0x00 },
        );
    }
}

/// Reads the memory-disk configuration byte the ROM left in the HCB, a bitmask of
/// [`MEMORY_DISK_MD0_ENABLED`]/[`MEMORY_DISK_MD1_ENABLED`].
pub fn read_memory_disk_config(memory: &BankedMemory) -> u8 {
    memory.fetch(HCB_BASE + MEMORY_DISK_CONFIG_OFFSET)
}

/// Installs the three-byte identification stamp at both well-known addresses, plus the pointer
/// at `0xFFFC`. Idempotent per §8: calling this twice leaves the common region bit-identical to
/// calling it once.
pub fn install_ident(memory: &mut BankedMemory, major: u8, minor: u8) {
    let version = (major << 4) | (minor & 0x0F);
    let stamp = [IDENT_SIGNATURE, IDENT_SIGNATURE_COMPLEMENT, version];

    for addr in [IDENT_ADDR_1, IDENT_ADDR_2] {
        for (i, byte) in stamp.iter().enumerate() {
            memory.store(addr + i as u16, *byte);
        }
    }

    memory.store_word(IDENT_POINTER_ADDR, IDENT_ADDR_1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_hcb_forces_api_type() {
        let mut memory = BankedMemory::new();
        memory.enable_banking();

        let mut rom = vec![0u8; HCB_SIZE];
        rom[API_TYPE_OFFSET as usize] = 0xEE;

        install_hcb(&mut memory, &rom);

        assert_eq!(memory.fetch(HCB_BASE + API_TYPE_OFFSET), API_TYPE_HBIOS);
    }

    #[test]
    fn install_hcb_copies_template() {
        let mut memory = BankedMemory::new();
        memory.enable_banking();

        let mut rom = vec![0u8; HCB_SIZE];
        rom[0] = 0xAB;

        install_hcb(&mut memory, &rom);

        assert_eq!(memory.fetch(HCB_BASE), 0xAB);
    }

    #[test]
    fn ident_is_idempotent() {
        let mut memory = BankedMemory::new();
        memory.enable_banking();

        install_ident(&mut memory, 3, 1);
        let mut first = vec![];
        for addr in 0x8000u32..=0xFFFF {
            first.push(memory.fetch(addr as u16));
        }

        install_ident(&mut memory, 3, 1);
        let mut second = vec![];
        for addr in 0x8000u32..=0xFFFF {
            second.push(memory.fetch(addr as u16));
        }

        assert_eq!(first, second);
    }

    #[test]
    fn ident_stamp_contents() {
        let mut memory = BankedMemory::new();
        memory.enable_banking();

        install_ident(&mut memory, 2, 5);

        assert_eq!(memory.fetch(IDENT_ADDR_1), 0x57);
        assert_eq!(memory.fetch(IDENT_ADDR_1 + 1), 0xA8);
        assert_eq!(memory.fetch(IDENT_ADDR_1 + 2), 0x25);
        assert_eq!(memory.fetch(IDENT_ADDR_2), 0x57);
        assert_eq!(memory.fetch_word(IDENT_POINTER_ADDR), IDENT_ADDR_1);
    }

    #[test]
    fn memory_disk_config_reads_the_byte_the_rom_left_behind() {
        let mut memory = BankedMemory::new();
        memory.enable_banking();

        let mut rom = vec![0u8; HCB_SIZE];
        rom[MEMORY_DISK_CONFIG_OFFSET as usize] =
            MEMORY_DISK_MD0_ENABLED | MEMORY_DISK_MD1_ENABLED;

        install_hcb(&mut memory, &rom);

        assert_eq!(
            read_memory_disk_config(&memory),
            MEMORY_DISK_MD0_ENABLED | MEMORY_DISK_MD1_ENABLED
        );
    }

    #[test]
    fn disk_unit_table_round_trip() {
        let mut memory = BankedMemory::new();
        memory.enable_banking();

        let mut units = [false; MAX_UNITS];
        units[0] = true;
        units[2] = true;

        write_disk_unit_table(&mut memory, &units);

        assert_eq!(memory.fetch(HCB_BASE + DISK_UNIT_TABLE_OFFSET), 0x01);
        assert_eq!(memory.fetch(HCB_BASE + DISK_UNIT_TABLE_OFFSET + 1), 0x00);
        assert_eq!(memory.fetch(HCB_BASE + DISK_UNIT_TABLE_OFFSET + 2), 0x01);
    }
}
