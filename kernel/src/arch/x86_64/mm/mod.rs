//! x86_64 Page Tables (4-level paging)
//!
//! Структура: PML4 → PDPT → PD → PT → физический адрес
//! Structure:  PML4 → PDPT → PD → PT → physical address
//!
//! Реализует трейт Arch из arch.
//! Implements the Arch trait from arch.
//!
//! Кэширование кодируется только битами PWT/PCD (индексы PAT 0..3), поэтому
//! бит PAT никогда не пересекается с адресом большой страницы.
//! Caching is encoded with PWT/PCD only (PAT indices 0..3), so the PAT bit
//! never collides with a large page's address bits.

use core::ops::RangeInclusive;

use crate::arch::{is_canonical_48, Arch};
use crate::mm::vmm::{Caching, Flags, PageSize};
use crate::mm::{PhysAddr, VirtAddr};

const PRESENT:  u64 = 1 << 0;
const WRITABLE: u64 = 1 << 1;
const USER:     u64 = 1 << 2;
const PWT:      u64 = 1 << 3;
const PCD:      u64 = 1 << 4;
const HUGE:     u64 = 1 << 7;
const GLOBAL:   u64 = 1 << 8;
const NO_EXEC:  u64 = 1 << 63;

const ADDR_MASK: u64 = 0x000F_FFFF_FFFF_F000;

/// x86_64, 4 уровня, страницы 4 KiB / 2 MiB / 1 GiB.
/// x86_64, 4 levels, 4 KiB / 2 MiB / 1 GiB pages.
#[derive(Debug, Clone, Copy)]
pub struct X86_64;

impl Arch for X86_64 {
    const LEVELS: usize = 4;
    const USER_ROOT_ENTRIES: usize = 256;
    const VALID_TABLE: u64 = PRESENT;
    // Права промежуточных таблиц максимальные — решает лист.
    // Intermediate tables grant everything; the leaf decides.
    const NEW_TABLE: u64 = PRESENT | WRITABLE | USER;
    const ADDR_MASK: u64 = ADDR_MASK;

    fn is_large(raw: u64) -> bool {
        raw & HUGE != 0
    }

    fn get_addr(raw: u64) -> PhysAddr {
        PhysAddr::new(raw & ADDR_MASK)
    }

    fn set_addr(raw: u64, addr: PhysAddr) -> u64 {
        (raw & !ADDR_MASK) | (addr.as_u64() & ADDR_MASK)
    }

    fn to_arch(flags: Flags, caching: Caching, psize: PageSize) -> u64 {
        let mut raw = PRESENT;
        if flags.contains(Flags::WRITE)  { raw |= WRITABLE; }
        if flags.contains(Flags::USER)   { raw |= USER; }
        if flags.contains(Flags::GLOBAL) { raw |= GLOBAL; }
        if !flags.contains(Flags::EXEC)  { raw |= NO_EXEC; }

        raw |= match caching {
            Caching::Normal      => 0,
            Caching::Framebuffer => PWT,
            Caching::Mmio        => PCD | PWT,
        };

        if psize != PageSize::Small {
            raw |= HUGE;
        }
        raw
    }

    fn from_arch(raw: u64, _psize: PageSize) -> (Flags, Caching) {
        let mut flags = Flags::empty();
        if raw & PRESENT != 0 {
            flags |= Flags::READ;
            if raw & NO_EXEC == 0 { flags |= Flags::EXEC; }
        }
        if raw & WRITABLE != 0 { flags |= Flags::WRITE; }
        if raw & USER != 0     { flags |= Flags::USER; }
        if raw & GLOBAL != 0   { flags |= Flags::GLOBAL; }

        let caching = match (raw & PCD != 0, raw & PWT != 0) {
            (false, false) => Caching::Normal,
            (false, true)  => Caching::Framebuffer,
            // UC- и UC оба некэшируемые / UC- and UC are both uncached
            (true, _)      => Caching::Mmio,
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
        #[cfg(all(target_arch = "x86_64", target_os = "none"))]
        unsafe {
            core::arch::asm!("invlpg [{}]", in(reg) vaddr.as_u64(), options(nostack, preserves_flags));
        }
    }

    #[allow(unused_variables)]
    unsafe fn load(root: PhysAddr) {
        #[cfg(all(target_arch = "x86_64", target_os = "none"))]
        unsafe {
            core::arch::asm!("mov cr3, {}", in(reg) root.as_u64(), options(nostack, preserves_flags));
        }
    }
}
