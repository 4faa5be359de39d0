//! Physical Memory Manager — интерфейс / interface
//!
//! Сам аллокатор кадров живёт вне этого крейта; здесь только контракт,
//! через который им пользуются PageMap и куча.
//! The frame allocator itself lives outside this crate; this is only the
//! contract PageMap and the heap use to talk to it.

use super::{Hhdm, PhysAddr};

/// Размер физического кадра / Physical frame size
pub const PAGE_SIZE: usize = 4096;

/// Выделение и освобождение физических кадров.
/// Allocation and release of physical frames.
pub trait FrameAllocator: Sync {
    /// Выделить `count` смежных кадров, обнулив их при `zero`.
    /// Allocate `count` contiguous frames, zeroing them if `zero` is set.
    fn alloc(&self, count: usize, zero: bool) -> Option<PhysAddr>;

    /// Вернуть `count` кадров, начиная с `addr`.
    /// Release `count` frames starting at `addr`.
    fn free(&self, addr: PhysAddr, count: usize);
}

/// Аллокатор кадров плюс окно HHDM — всё, что нужно дереву таблиц.
/// Frame allocator plus the HHDM window: everything the table tree needs.
#[derive(Clone, Copy)]
pub struct PhysMem<'m> {
    pub frames: &'m dyn FrameAllocator,
    pub hhdm:   Hhdm,
}

impl<'m> PhysMem<'m> {
    pub const fn new(frames: &'m dyn FrameAllocator, hhdm: Hhdm) -> Self {
        Self { frames, hhdm }
    }
}

/// Число кадров, покрывающих `length` байт.
/// Number of frames covering `length` bytes.
pub const fn pages_for(length: usize) -> usize {
    length.div_ceil(PAGE_SIZE)
}
