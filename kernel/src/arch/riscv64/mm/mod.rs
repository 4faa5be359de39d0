//! riscv64 Page Tables (Sv48)
//!
//! Лист — любая действительная запись с R, W или X; отдельного бита
//! «большая страница» нет. Кэширование — через Svpbmt (биты 61..62).
//! A leaf is any valid entry with R, W or X; there is no separate
//! "large page" bit. Caching goes through Svpbmt (bits 61..62).

use core::ops::RangeInclusive;

use crate::arch::{is_canonical_48, Arch};
use crate::mm::vmm::{Caching, Flags, PageSize};
use crate::mm::{PhysAddr, VirtAddr};

const VALID:    u64 = 1 << 0;
const READ:     u64 = 1 << 1;
const WRITE:    u64 = 1 << 2;
const EXEC:     u64 = 1 << 3;
const USER:     u64 = 1 << 4;
const GLOBAL:   u64 = 1 << 5;
const ACCESSED: u64 = 1 << 6;
const DIRTY:    u64 = 1 << 7;

const PBMT_SHIFT: u64 = 61;
const PBMT_MASK:  u64 = 0b11 << PBMT_SHIFT;
const PBMT_NC:    u64 = 1 << PBMT_SHIFT;
const PBMT_IO:    u64 = 2 << PBMT_SHIFT;

const PPN_SHIFT: u64 = 10;
const PPN_MASK:  u64 = ((1 << 44) - 1) << PPN_SHIFT;

/// Режим Sv48 в `satp` / Sv48 mode in `satp`.
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
const SATP_SV48: u64 = 9 << 60;

/// Sv48, 4 уровня, страницы 4 KiB / 2 MiB / 1 GiB.
/// Sv48, 4 levels, 4 KiB / 2 MiB / 1 GiB pages.
#[derive(Debug, Clone, Copy)]
pub struct Sv48;

impl Arch for Sv48 {
    const LEVELS: usize = 4;
    const USER_ROOT_ENTRIES: usize = 256;
    const VALID_TABLE: u64 = VALID;
    // Нелистовая запись: только V (U/A/D зарезервированы).
    // Non-leaf entry: V only (U/A/D are reserved).
    const NEW_TABLE: u64 = VALID;
    const ADDR_MASK: u64 = PPN_MASK;

    fn is_large(raw: u64) -> bool {
        raw & (READ | WRITE | EXEC) != 0
    }

    fn get_addr(raw: u64) -> PhysAddr {
        PhysAddr::new(((raw & PPN_MASK) >> PPN_SHIFT) << 12)
    }

    fn set_addr(raw: u64, addr: PhysAddr) -> u64 {
        (raw & !PPN_MASK) | (((addr.as_u64() >> 12) << PPN_SHIFT) & PPN_MASK)
    }

    fn to_arch(flags: Flags, caching: Caching, _psize: PageSize) -> u64 {
        // A/D выставлены заранее: не все реализации обновляют их аппаратно.
        // A/D are preset: not every implementation updates them in hardware.
        // W без R зарезервирован, а V без RWX — указатель на таблицу, так что R всегда есть.
        // W without R is reserved and V without RWX is a table pointer, so R is always set.
        let mut raw = VALID | ACCESSED | DIRTY | READ;
        if flags.contains(Flags::WRITE)  { raw |= WRITE; }
        if flags.contains(Flags::EXEC)   { raw |= EXEC; }
        if flags.contains(Flags::USER)   { raw |= USER; }
        if flags.contains(Flags::GLOBAL) { raw |= GLOBAL; }

        raw | match caching {
            Caching::Normal      => 0,
            Caching::Framebuffer => PBMT_NC,
            Caching::Mmio        => PBMT_IO,
        }
    }

    fn from_arch(raw: u64, _psize: PageSize) -> (Flags, Caching) {
        let mut flags = Flags::empty();
        if raw & READ != 0   { flags |= Flags::READ; }
        if raw & WRITE != 0  { flags |= Flags::WRITE; }
        if raw & EXEC != 0   { flags |= Flags::EXEC; }
        if raw & USER != 0   { flags |= Flags::USER; }
        if raw & GLOBAL != 0 { flags |= Flags::GLOBAL; }

        let caching = match raw & PBMT_MASK {
            PBMT_NC => Caching::Framebuffer,
            PBMT_IO => Caching::Mmio,
            _       => Caching::Normal,
        };
        (flags, caching)
    }

    fn is_canonical(addr: u64) -> bool {
        is_canonical_48(addr)
    }

    fn kernel_range() -> RangeInclusive<u64> {
        0xFFFF_8000_0000_0000..=0xFFFF_FFFF_FFFF_FFFF
    }

    fn user_range() -> RangeInclusive<u64> {
        0x0000_0000_0000_1000..=0x0000_7FFF_FFFF_FFFF
    }

    #[allow(unused_variables)]
    fn invalidate(vaddr: VirtAddr) {
        #[cfg(all(target_arch = "riscv64", target_os = "none"))]
        unsafe {
            core::arch::asm!("sfence.vma {}, zero", in(reg) vaddr.as_u64(), options(nostack));
        }
    }

    #[allow(unused_variables)]
    unsafe fn load(root: PhysAddr) {
        #[cfg(all(target_arch = "riscv64", target_os = "none"))]
        unsafe {
            let satp = SATP_SV48 | (root.as_u64() >> 12);
            core::arch::asm!("csrw satp, {}", "sfence.vma", in(reg) satp, options(nostack));
        }
    }
}
