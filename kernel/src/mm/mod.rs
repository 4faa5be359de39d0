//! Memory Management subsystem
//!
//! Уровни / Layers:
//!   pmm     — интерфейс физического аллокатора / physical frame allocator interface
//!   table   — узел дерева и доступ к записям / tree node and entry accessor
//!   pagemap — дерево таблиц страниц / page-table tree
//!   vmm     — типы, ядерный PageMap, загрузка / types, kernel PageMap, boot mapping
//!   heap    — куча ядра / Kernel Heap (Slab Allocator)

pub mod heap;
pub mod pagemap;
pub mod pmm;
pub mod table;
pub mod vmm;

use core::ops::Add;

/// Физический адрес / Physical address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct PhysAddr(pub u64);

/// Виртуальный адрес / Virtual address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct VirtAddr(pub u64);

macro_rules! addr_ops {
    ($ty:ident) => {
        impl $ty {
            pub const fn new(addr: u64) -> Self { Self(addr) }
            pub const fn as_u64(self) -> u64   { self.0 }
            pub const fn as_usize(self) -> usize { self.0 as usize }

            /// `align` must be a power of two.
            pub const fn is_aligned(self, align: usize) -> bool {
                self.0 & (align as u64 - 1) == 0
            }

            pub const fn align_down(self, align: usize) -> Self {
                Self(self.0 & !(align as u64 - 1))
            }

            pub const fn align_up(self, align: usize) -> Self {
                Self((self.0 + (align as u64 - 1)) & !(align as u64 - 1))
            }

            /// Bytes from `base` up to `self`; `base` must not be above `self`.
            pub const fn offset_from(self, base: Self) -> usize {
                (self.0 - base.0) as usize
            }
        }

        impl Add<usize> for $ty {
            type Output = Self;

            fn add(self, rhs: usize) -> Self {
                Self(self.0 + rhs as u64)
            }
        }

        impl core::fmt::LowerHex for $ty {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::LowerHex::fmt(&self.0, f)
            }
        }

        impl core::fmt::UpperHex for $ty {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::UpperHex::fmt(&self.0, f)
            }
        }
    };
}

addr_ops!(PhysAddr);
addr_ops!(VirtAddr);

/// Higher-half direct map: вся физическая память видна по фиксированному смещению.
/// Higher-half direct map: all of physical memory is visible at a fixed offset.
///
/// Код дерева таблиц ходит по таблицам только через это окно.
/// The table-tree code only ever touches tables through this window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hhdm {
    offset: u64,
}

impl Hhdm {
    pub const fn new(offset: u64) -> Self { Self { offset } }
    pub const fn offset(self) -> u64      { self.offset }

    pub const fn to_virt(self, phys: PhysAddr) -> VirtAddr {
        VirtAddr(phys.0.wrapping_add(self.offset))
    }

    pub const fn to_phys(self, virt: VirtAddr) -> PhysAddr {
        PhysAddr(virt.0.wrapping_sub(self.offset))
    }

    pub fn as_ptr<T>(self, phys: PhysAddr) -> *mut T {
        self.to_virt(phys).as_usize() as *mut T
    }
}

/// Поднять подсистему памяти: PageMap ядра → окно vspace → куча.
/// Bring up memory: kernel PageMap → vspace window → heap.
///
/// Вызывается ровно один раз на раннем этапе загрузки.
/// Called exactly once during early boot.
pub fn init(frames: &'static dyn pmm::FrameAllocator, boot: &vmm::BootInfo<'_>, free_start: PhysAddr) {
    log::info!("Initializing VMM...");
    vmm::init(frames, boot);

    log::info!("Reserving heap virtual window...");
    vmm::init_vspaces(free_start);

    // После этого работают Box<T>, Vec<T>!
    // After this Box<T>, Vec<T> work!
    log::info!("Initializing heap (Slab)...");
    heap::init();
}
