//! Virtual Memory Manager
//!
//! Переносимые типы отображений, ядерный PageMap и окно виртуальных адресов кучи.
//! Portable mapping types, the kernel PageMap and the heap's virtual window.
//!
//! Пользовательские адресные пространства (VMA, mmap) строятся выше, поверх PageMap.
//! User address spaces (VMAs, mmap) are built above, on top of PageMap.

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;
use spin::Once;

use super::pagemap::PageMap;
use super::pmm::{FrameAllocator, PhysMem, PAGE_SIZE};
use super::{Hhdm, PhysAddr, VirtAddr};
use crate::arch::{self, Arch};

bitflags! {
    /// Флаги страницы / Page flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Flags: u8 {
        const READ   = 1 << 0;
        const WRITE  = 1 << 1;
        const EXEC   = 1 << 2;
        const USER   = 1 << 3;
        const GLOBAL = 1 << 4;

        const RW  = Self::READ.bits() | Self::WRITE.bits();
        const RWG = Self::RW.bits() | Self::GLOBAL.bits();
        const RWX = Self::RW.bits() | Self::EXEC.bits();
    }
}

impl Flags {
    /// Права из `p_flags` заголовка программы ELF.
    /// Permissions from an ELF program header's `p_flags`.
    pub fn from_elf(p_flags: u32) -> Self {
        const PF_X: u32 = 1;
        const PF_W: u32 = 2;
        const PF_R: u32 = 4;

        let mut flags = Self::empty();
        if p_flags & PF_R != 0 { flags |= Self::READ; }
        if p_flags & PF_W != 0 { flags |= Self::WRITE; }
        if p_flags & PF_X != 0 { flags |= Self::EXEC; }
        flags
    }
}

/// Политика кэширования / Cache policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Caching {
    #[default]
    Normal,
    /// Write-combining (кадровый буфер / framebuffer)
    Framebuffer,
    /// Некэшируемая память устройств / Uncached device memory
    Mmio,
}

/// Гранулярность трансляции / Translation granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PageSize {
    /// 4 KiB
    Small,
    /// 2 MiB
    Medium,
    /// 1 GiB
    Large,
}

impl PageSize {
    pub const ALL: [PageSize; 3] = [PageSize::Small, PageSize::Medium, PageSize::Large];

    /// Уровень дерева, на котором лежит лист этого размера (0 — нижний).
    /// Tree level holding a leaf of this size (0 is the bottom).
    pub const fn level(self) -> usize {
        match self {
            PageSize::Small  => 0,
            PageSize::Medium => 1,
            PageSize::Large  => 2,
        }
    }

    pub const fn from_level(level: usize) -> Option<Self> {
        match level {
            0 => Some(PageSize::Small),
            1 => Some(PageSize::Medium),
            2 => Some(PageSize::Large),
            _ => None,
        }
    }

    pub const fn bytes(self) -> usize {
        PAGE_SIZE << (9 * self.level())
    }

    pub const fn smaller(self) -> Option<Self> {
        match self {
            PageSize::Small  => None,
            PageSize::Medium => Some(PageSize::Small),
            PageSize::Large  => Some(PageSize::Medium),
        }
    }

    /// Опуститься до размера, который поддерживает архитектура.
    /// Step down to a size the architecture supports.
    pub fn fixed<A: Arch>(self) -> Self {
        let mut psize = self;
        while !A::supports(psize) {
            match psize.smaller() {
                Some(smaller) => psize = smaller,
                None => break,
            }
        }
        psize
    }
}

/// Наибольший размер, на который выровнен `addr_bits` и который не длиннее `remaining`.
/// Largest size `addr_bits` is aligned to that does not exceed `remaining`.
///
/// `None`, если даже 4 KiB не подходит.
/// `None` when not even 4 KiB fits.
pub fn max_page_size(addr_bits: u64, remaining: usize) -> Option<PageSize> {
    PageSize::ALL
        .into_iter()
        .rev()
        .find(|psize| addr_bits % psize.bytes() as u64 == 0 && remaining >= psize.bytes())
}

/// Ошибки PageMap / PageMap errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Адрес или длина не выровнены на выбранный размер.
    /// Address or length not aligned to the chosen size.
    AddrNotAligned,
    /// Слот уже занят, или гранулярность не совпала.
    /// Slot already in use, or the granularity did not match.
    AddrInUse,
    /// Нет отображения там, где оно требуется.
    /// No mapping where one was required.
    InvalidEntry,
    /// Не удалось выделить кадр под таблицу.
    /// No frame available for a table.
    OutOfMemory,
    /// Диапазон выходит за вершину адресного пространства или задевает
    /// ядерную половину пользовательского PageMap.
    /// The range runs past the top of the address space or touches the
    /// kernel half of a user PageMap.
    InvalidRange,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Error::AddrNotAligned => "address not aligned",
            Error::AddrInUse      => "address already in use",
            Error::InvalidEntry   => "invalid entry",
            Error::OutOfMemory    => "out of memory",
            Error::InvalidRange   => "invalid address range",
        })
    }
}

pub type Result<T> = core::result::Result<T, Error>;

// ── Классификация адресов / Address classification ─────────────────────────

/// Чьему адресному пространству принадлежит диапазон.
/// Which address space a range belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressSpace {
    User,
    Kernel,
    Invalid,
}

pub fn classify<A: Arch>(addr: u64, len: usize) -> AddressSpace {
    let Some(end) = addr.checked_add(len as u64) else {
        return AddressSpace::Invalid;
    };
    // Включительная граница / inclusive bound
    let last = if len == 0 { addr } else { end - 1 };

    let (user, kernel) = (A::user_range(), A::kernel_range());
    if user.contains(&addr) && user.contains(&last) {
        AddressSpace::User
    } else if kernel.contains(&addr) && kernel.contains(&last) {
        AddressSpace::Kernel
    } else {
        AddressSpace::Invalid
    }
}

pub fn classify_address(addr: u64, len: usize) -> AddressSpace {
    classify::<arch::Current>(addr, len)
}

// ── Окно виртуальных адресов / Virtual-space cursor ─────────────────────────

/// Монотонный курсор: выданные адреса никогда не возвращаются.
/// Monotonic cursor: handed-out addresses are never reclaimed.
pub struct VSpace {
    next: AtomicU64,
}

impl VSpace {
    pub const fn new(base: VirtAddr) -> Self {
        Self { next: AtomicU64::new(base.as_u64()) }
    }

    pub fn alloc(&self, pages: usize) -> VirtAddr {
        VirtAddr::new(self.next.fetch_add((pages * PAGE_SIZE) as u64, Ordering::Relaxed))
    }

    pub fn peek(&self) -> VirtAddr {
        VirtAddr::new(self.next.load(Ordering::Relaxed))
    }
}

const VSPACE_ALIGN: usize = 1 << 30;

static VSPACE: Once<VSpace> = Once::new();
static KERNEL_PAGEMAP: Once<PageMap<'static>> = Once::new();

/// Поставить окно кучи за концом используемой физической памяти.
/// Place the heap window past the end of used physical memory.
pub fn init_vspaces(free_start: PhysAddr) {
    let hhdm = kernel_pagemap().phys().hhdm;
    let base = hhdm.to_virt(free_start.align_up(VSPACE_ALIGN));
    log::debug!("vspace base: {:#x}", base);
    VSPACE.call_once(|| VSpace::new(base));
}

pub fn vspace() -> &'static VSpace {
    match VSPACE.get() {
        Some(vspace) => vspace,
        None => panic!("vmm: vspace used before init_vspaces()"),
    }
}

/// Зарезервировать `pages` страниц виртуального окна.
/// Reserve `pages` pages of the virtual window.
pub fn alloc_vspace(pages: usize) -> VirtAddr {
    vspace().alloc(pages)
}

pub fn kernel_pagemap() -> &'static PageMap<'static> {
    match KERNEL_PAGEMAP.get() {
        Some(pagemap) => pagemap,
        None => panic!("vmm: kernel pagemap used before init()"),
    }
}

// ── Загрузка / Boot ─────────────────────────────────────────────────────────

/// Тип региона карты памяти загрузчика / Bootloader memory map region kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    Usable,
    Reserved,
    AcpiReclaimable,
    AcpiNvs,
    BadMemory,
    BootloaderReclaimable,
    KernelAndModules,
    Framebuffer,
}

#[derive(Debug, Clone, Copy)]
pub struct MemoryRegion {
    pub base:   PhysAddr,
    pub length: usize,
    pub kind:   RegionKind,
}

/// Загружаемый (PT_LOAD) сегмент ядра / Loadable (PT_LOAD) kernel segment
#[derive(Debug, Clone, Copy)]
pub struct KernelSegment {
    pub vaddr:   VirtAddr,
    pub paddr:   PhysAddr,
    pub size:    usize,
    /// ELF `p_flags`
    pub p_flags: u32,
}

/// Всё, что загрузчик сообщил о памяти.
/// Everything the bootloader reported about memory.
#[derive(Debug, Clone, Copy)]
pub struct BootInfo<'a> {
    pub hhdm:            Hhdm,
    pub memory_map:      &'a [MemoryRegion],
    pub kernel_segments: &'a [KernelSegment],
}

/// Построить ядерный PageMap: HHDM поверх карты памяти плюс сегменты ядра.
/// Build the kernel PageMap: HHDM over the memory map plus the kernel segments.
pub fn build_kernel_pagemap<'m, A: Arch>(
    frames: &'m dyn FrameAllocator,
    boot: &BootInfo<'_>,
) -> Result<PageMap<'m, A>> {
    log::info!("setting up the kernel pagemap");
    log::debug!("hhdm offset: {:#x}", boot.hhdm.offset());

    let pagemap = PageMap::<A>::new_kernel(PhysMem::new(frames, boot.hhdm))?;

    log::debug!("mapping memory map entries");
    for region in boot.memory_map {
        let caching = match region.kind {
            RegionKind::Usable
            | RegionKind::BootloaderReclaimable
            | RegionKind::KernelAndModules => Caching::Normal,
            RegionKind::Framebuffer => Caching::Framebuffer,
            _ => continue,
        };
        if region.length == 0 {
            continue;
        }

        let vaddr = boot.hhdm.to_virt(region.base);
        log::debug!(
            " - {:?}: {:#x} bytes, {:#x} -> {:#x}",
            region.kind, region.length, region.base, vaddr
        );
        pagemap.map(vaddr, region.base, region.length, Flags::RW, None, caching)?;
    }

    log::debug!("mapping kernel segments");
    for segment in boot.kernel_segments {
        let flags = Flags::GLOBAL | Flags::from_elf(segment.p_flags);
        log::debug!(
            " - phdr: {:#x} bytes, flags: {:?}, {:#x} -> {:#x}",
            segment.size, flags, segment.paddr, segment.vaddr
        );
        pagemap.map(segment.vaddr, segment.paddr, segment.size, flags, None, Caching::Normal)?;
    }

    Ok(pagemap)
}

/// Построить, загрузить и опубликовать ядерный PageMap.
/// Build, load and publish the kernel PageMap.
pub fn init(frames: &'static dyn FrameAllocator, boot: &BootInfo<'_>) {
    let pagemap = match build_kernel_pagemap::<arch::Current>(frames, boot) {
        Ok(pagemap) => pagemap,
        Err(err) => panic!("could not map virtual memory: {}", err),
    };

    let pagemap = KERNEL_PAGEMAP.call_once(|| pagemap);

    log::debug!("loading the kernel pagemap");
    // SAFETY: карта покрывает HHDM и все сегменты ядра.
    // SAFETY: the map covers the HHDM and every kernel segment.
    unsafe { pagemap.load() };
}
