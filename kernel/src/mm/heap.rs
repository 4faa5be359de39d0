//! Kernel Heap: Slab Allocator
//!
//! Классы объектов 16..=1024 байт; каждый слаб — одна страница с заголовком
//! в начале. Запросы крупнее 1024 байт получают свои страницы плюс страницу
//! заголовка, поэтому выровненный на страницу указатель — всегда крупный блок.
//! Object classes 16..=1024 bytes; each slab is one page with a header at its
//! start. Requests above 1024 bytes get their own pages plus a header page, so
//! a page-aligned pointer is always a large block.
//!
//! Память берётся у [`Policy`]; в ядре это [`KernelPolicy`] поверх PageMap ядра.
//! Memory comes from a [`Policy`]; in the kernel that is [`KernelPolicy`] over
//! the kernel PageMap.

use core::{
    alloc::{GlobalAlloc, Layout},
    mem,
    ptr::{self, NonNull},
};
use spin::{Mutex, Once};

use super::pagemap::PageMap;
use super::pmm::{pages_for, PAGE_SIZE};
use super::vmm::{self, Caching, Flags, PageSize, VSpace};
use super::VirtAddr;
use crate::arch::{self, Arch};

pub const MIN_CLASS: usize = 16;
const NUM_CLASSES:   usize = 7;
pub const MAX_CLASS: usize = MIN_CLASS << (NUM_CLASSES - 1);

const SLAB_MAGIC:  u32 = 0x51AB_CAFE;
const LARGE_MAGIC: u32 = 0x1A26_E0B1;

/// Источник страниц для кучи / Page source for the heap.
pub trait Policy: Sync {
    /// Отдать `length` байт (округлённых до страниц), выровненных на страницу.
    /// Hand out `length` bytes (rounded to pages), page-aligned.
    ///
    /// Не возвращает ошибку: без памяти под кучу ядру жить нечем.
    /// Never fails: without heap memory the kernel has nothing to run on.
    fn map(&self, length: usize) -> usize;

    /// # Safety
    /// `[addr, addr + length)` получен из `map` и больше не используется.
    /// `[addr, addr + length)` came from `map` and is no longer used.
    unsafe fn unmap(&self, addr: usize, length: usize);
}

struct FreeNode {
    next: Option<NonNull<FreeNode>>,
}

#[repr(C)]
struct SlabHeader {
    magic: u32,
    class: u32,
    used:  usize,
    free:  Option<NonNull<FreeNode>>,
    prev:  Option<NonNull<SlabHeader>>,
    next:  Option<NonNull<SlabHeader>>,
}

#[repr(C)]
struct LargeHeader {
    magic: u32,
    /// Вместе со страницей заголовка / Including the header page
    pages: usize,
}

// NonNull не Send по умолчанию — оборачиваем
// NonNull is not Send by default, so wrap it
struct SlabList(Option<NonNull<SlabHeader>>);
unsafe impl Send for SlabList {}

/// Один класс размера: список слабов со свободными объектами.
/// One size class: the list of slabs that still have free objects.
struct SlabCache {
    class:   usize,
    partial: SlabList,
    /// Пустых слабов в списке / Empty slabs on the list
    empty:   usize,
}

impl SlabCache {
    const fn new(class: usize) -> Self {
        Self { class, partial: SlabList(None), empty: 0 }
    }

    fn obj_size(&self) -> usize {
        MIN_CLASS << self.class
    }

    /// Смещение первого объекта: за заголовком, с выравниванием на класс.
    /// Offset of the first object: past the header, aligned to the class.
    fn first(&self) -> usize {
        mem::size_of::<SlabHeader>().next_multiple_of(self.obj_size())
    }

    fn capacity(&self) -> usize {
        (PAGE_SIZE - self.first()) / self.obj_size()
    }

    fn push(&mut self, slab: NonNull<SlabHeader>) {
        let head = self.partial.0;
        // SAFETY: слабы списка живы и защищены блокировкой класса
        // SAFETY: slabs on the list are alive and guarded by the class lock
        unsafe {
            (*slab.as_ptr()).prev = None;
            (*slab.as_ptr()).next = head;
            if let Some(head) = head {
                (*head.as_ptr()).prev = Some(slab);
            }
        }
        self.partial.0 = Some(slab);
    }

    fn unlink(&mut self, slab: NonNull<SlabHeader>) {
        // SAFETY: как в push / as in push
        unsafe {
            let (prev, next) = ((*slab.as_ptr()).prev, (*slab.as_ptr()).next);
            match prev {
                Some(prev) => (*prev.as_ptr()).next = next,
                None => self.partial.0 = next,
            }
            if let Some(next) = next {
                (*next.as_ptr()).prev = prev;
            }
            (*slab.as_ptr()).prev = None;
            (*slab.as_ptr()).next = None;
        }
    }

    fn grow(&mut self, policy: &impl Policy) -> NonNull<SlabHeader> {
        let base = policy.map(PAGE_SIZE);
        let Some(slab) = NonNull::new(base as *mut SlabHeader) else {
            panic!("slab: policy returned a null page");
        };

        let mut free = None;
        for i in (0..self.capacity()).rev() {
            let node = (base + self.first() + i * self.obj_size()) as *mut FreeNode;
            // SAFETY: внутри свежей страницы / inside the fresh page
            unsafe { node.write(FreeNode { next: free }) };
            free = NonNull::new(node);
        }

        // SAFETY: начало свежей страницы / start of the fresh page
        unsafe {
            slab.as_ptr().write(SlabHeader {
                magic: SLAB_MAGIC,
                class: self.class as u32,
                used:  0,
                free,
                prev:  None,
                next:  None,
            });
        }
        self.push(slab);
        self.empty += 1;
        slab
    }

    fn alloc(&mut self, policy: &impl Policy) -> *mut u8 {
        let slab = match self.partial.0 {
            Some(slab) => slab,
            None => self.grow(policy),
        };
        let header = slab.as_ptr();

        // SAFETY: слаб из списка, под блокировкой класса
        // SAFETY: slab from the list, under the class lock
        unsafe {
            let Some(node) = (*header).free else {
                panic!("slab: full slab on the partial list");
            };
            (*header).free = (*node.as_ptr()).next;
            if (*header).used == 0 {
                self.empty -= 1;
            }
            (*header).used += 1;
            if (*header).free.is_none() {
                self.unlink(slab);
            }
            node.as_ptr().cast()
        }
    }

    /// # Safety
    /// `ptr` — живой объект слаба `slab` этого класса.
    /// `ptr` is a live object of slab `slab` in this class.
    unsafe fn free(&mut self, slab: NonNull<SlabHeader>, ptr: *mut u8, policy: &impl Policy) {
        let header = slab.as_ptr();
        let node = ptr.cast::<FreeNode>();

        let used = unsafe {
            let was_full = (*header).free.is_none();
            node.write(FreeNode { next: (*header).free });
            (*header).free = NonNull::new(node);
            (*header).used -= 1;
            if was_full {
                self.push(slab);
            }
            (*header).used
        };

        if used == 0 {
            // Один пустой слаб держим про запас / Keep one empty slab in reserve
            if self.empty > 0 {
                self.unlink(slab);
                unsafe { policy.unmap(header as usize, PAGE_SIZE) };
            } else {
                self.empty += 1;
            }
        }
    }
}

/// Пул слабов поверх политики `P` / Slab pool on top of policy `P`.
pub struct SlabPool<P: Policy> {
    policy:  P,
    classes: [Mutex<SlabCache>; NUM_CLASSES],
}

impl<P: Policy> SlabPool<P> {
    pub const fn new(policy: P) -> Self {
        Self {
            policy,
            classes: [
                Mutex::new(SlabCache::new(0)),
                Mutex::new(SlabCache::new(1)),
                Mutex::new(SlabCache::new(2)),
                Mutex::new(SlabCache::new(3)),
                Mutex::new(SlabCache::new(4)),
                Mutex::new(SlabCache::new(5)),
                Mutex::new(SlabCache::new(6)),
            ],
        }
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    fn class_of(size: usize) -> Option<usize> {
        if size > MAX_CLASS {
            return None;
        }
        let bits = size.max(MIN_CLASS).next_power_of_two().trailing_zeros();
        Some((bits - MIN_CLASS.trailing_zeros()) as usize)
    }

    /// `null` для нулевого размера / `null` for a zero size.
    pub fn allocate(&self, size: usize) -> *mut u8 {
        if size == 0 {
            return ptr::null_mut();
        }
        match Self::class_of(size) {
            Some(class) => self.classes[class].lock().alloc(&self.policy),
            None => self.allocate_large(size),
        }
    }

    fn allocate_large(&self, size: usize) -> *mut u8 {
        let pages = pages_for(size) + 1;
        let base = self.policy.map(pages * PAGE_SIZE);
        // SAFETY: страница заголовка только что выдана политикой
        // SAFETY: the header page was just handed out by the policy
        unsafe { (base as *mut LargeHeader).write(LargeHeader { magic: LARGE_MAGIC, pages }) };
        (base + PAGE_SIZE) as *mut u8
    }

    /// Для `GlobalAlloc`: размер `max(size, align)`, выравнивание не больше страницы.
    /// For `GlobalAlloc`: size `max(size, align)`, alignment at most a page.
    pub fn allocate_layout(&self, layout: Layout) -> *mut u8 {
        if layout.align() > PAGE_SIZE {
            return ptr::null_mut();
        }
        self.allocate(layout.size().max(layout.align()))
    }

    fn large_header(ptr: *mut u8) -> *mut LargeHeader {
        let header = (ptr as usize - PAGE_SIZE) as *mut LargeHeader;
        // SAFETY: у крупного блока страница заголовка прямо перед ним
        // SAFETY: a large block has its header page right before it
        let magic = unsafe { (*header).magic };
        assert_eq!(magic, LARGE_MAGIC, "slab: {:p} is not a heap block", ptr);
        header
    }

    fn slab_of(ptr: *mut u8) -> NonNull<SlabHeader> {
        let header = (ptr as usize & !(PAGE_SIZE - 1)) as *mut SlabHeader;
        // SAFETY: объект слаба лежит в той же странице, что и заголовок
        // SAFETY: a slab object lives in the same page as its header
        let magic = unsafe { (*header).magic };
        assert_eq!(magic, SLAB_MAGIC, "slab: {:p} is not a heap object", ptr);
        match NonNull::new(header) {
            Some(slab) => slab,
            None => panic!("slab: null slab header"),
        }
    }

    /// Сколько байт реально доступно по `ptr`.
    /// How many bytes are actually usable at `ptr`.
    ///
    /// # Safety
    /// `ptr` получен из этого пула и ещё не освобождён.
    /// `ptr` came from this pool and has not been freed.
    pub unsafe fn usable_size(&self, ptr: *mut u8) -> usize {
        if ptr as usize % PAGE_SIZE == 0 {
            let header = Self::large_header(ptr);
            (unsafe { (*header).pages } - 1) * PAGE_SIZE
        } else {
            let slab = Self::slab_of(ptr);
            MIN_CLASS << unsafe { (*slab.as_ptr()).class }
        }
    }

    /// # Safety
    /// `ptr` — `null` или получен из этого пула и ещё не освобождён.
    /// `ptr` is `null` or came from this pool and has not been freed.
    pub unsafe fn free(&self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }

        if ptr as usize % PAGE_SIZE == 0 {
            let header = Self::large_header(ptr);
            let pages = unsafe { (*header).pages };
            unsafe { self.policy.unmap(header as usize, pages * PAGE_SIZE) };
        } else {
            let slab = Self::slab_of(ptr);
            let class = unsafe { (*slab.as_ptr()).class } as usize;
            unsafe { self.classes[class].lock().free(slab, ptr, &self.policy) };
        }
    }

    /// # Safety
    /// Как у [`SlabPool::free`] / Same as [`SlabPool::free`].
    pub unsafe fn reallocate(&self, ptr: *mut u8, size: usize) -> *mut u8 {
        if ptr.is_null() {
            return self.allocate(size);
        }
        if size == 0 {
            unsafe { self.free(ptr) };
            return ptr::null_mut();
        }

        let usable = unsafe { self.usable_size(ptr) };
        if size <= usable {
            return ptr;
        }

        let new = self.allocate(size);
        if !new.is_null() {
            unsafe {
                ptr::copy_nonoverlapping(ptr, new, usable);
                self.free(ptr);
            }
        }
        new
    }
}

// ── Политика ядра / Kernel policy ───────────────────────────────────────────

/// Страницы из окна vspace, кадры из физического аллокатора, отображения в PageMap ядра.
/// Pages from the vspace window, frames from the physical allocator, mappings in the kernel PageMap.
pub struct KernelPolicy<'p, 'm, A: Arch = arch::Current> {
    pagemap: &'p PageMap<'m, A>,
    vspace:  &'p VSpace,
}

impl<'p, 'm, A: Arch> KernelPolicy<'p, 'm, A> {
    pub const fn new(pagemap: &'p PageMap<'m, A>, vspace: &'p VSpace) -> Self {
        Self { pagemap, vspace }
    }
}

impl<A: Arch> Policy for KernelPolicy<'_, '_, A> {
    fn map(&self, length: usize) -> usize {
        let pages = pages_for(length);
        let base = self.vspace.alloc(pages);
        let frames = self.pagemap.phys().frames;

        for page in 0..pages {
            let vaddr = base + page * PAGE_SIZE;
            let Some(paddr) = frames.alloc(1, true) else {
                panic!("slab: out of physical memory at {:#x}", vaddr);
            };
            if let Err(err) = self.pagemap.map(vaddr, paddr, PAGE_SIZE, Flags::RWG, Some(PageSize::Small), Caching::Normal) {
                panic!("slab: could not map page: {}", err);
            }
        }
        base.as_usize()
    }

    unsafe fn unmap(&self, addr: usize, length: usize) {
        let frames = self.pagemap.phys().frames;
        let base = VirtAddr::new(addr as u64);

        for page in 0..pages_for(length) {
            let vaddr = base + page * PAGE_SIZE;
            // Сначала translate: после unmap кадр уже не найти.
            // Translate first: after unmap the frame cannot be found.
            let paddr = match self.pagemap.translate(vaddr, PageSize::Small) {
                Ok(paddr) => paddr,
                Err(err) => {
                    log::warn!("slab: {:#x} is not mapped: {}", vaddr, err);
                    continue;
                }
            };
            if let Err(err) = self.pagemap.unmap(vaddr, PAGE_SIZE, Some(PageSize::Small)) {
                log::warn!("slab: could not unmap {:#x}: {}", vaddr, err);
                continue;
            }
            frames.free(paddr, 1);
        }
    }
}

// ── Куча ядра / Kernel heap ─────────────────────────────────────────────────

pub struct KernelHeap {
    pool: Once<SlabPool<KernelPolicy<'static, 'static>>>,
}

impl KernelHeap {
    pub const fn new() -> Self {
        Self { pool: Once::new() }
    }

    fn pool(&self) -> &SlabPool<KernelPolicy<'static, 'static>> {
        match self.pool.get() {
            Some(pool) => pool,
            None => panic!("heap: used before heap::init()"),
        }
    }
}

impl Default for KernelHeap {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl GlobalAlloc for KernelHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.pool().allocate_layout(layout)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        unsafe { self.pool().free(ptr) }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        // Класс не меньше выравнивания — новый объект выровнен так же.
        // The class is at least the alignment, so the new object is aligned the same.
        unsafe { self.pool().reallocate(ptr, new_size.max(layout.align())) }
    }
}

#[cfg_attr(target_os = "none", global_allocator)]
static HEAP: KernelHeap = KernelHeap::new();

/// Поднять кучу поверх PageMap ядра. Требует `vmm::init` и `vmm::init_vspaces`.
/// Bring up the heap over the kernel PageMap. Requires `vmm::init` and `vmm::init_vspaces`.
pub fn init() {
    if HEAP.pool.is_completed() {
        panic!("heap: init() called twice");
    }

    let policy = KernelPolicy::new(vmm::kernel_pagemap(), vmm::vspace());
    HEAP.pool.call_once(|| SlabPool::new(policy));
    log::info!("slab allocator ready ({} classes, {}..={} bytes)", NUM_CLASSES, MIN_CLASS, MAX_CLASS);
}

pub fn alloc(size: usize) -> *mut u8 {
    HEAP.pool().allocate(size)
}

/// # Safety
/// См. [`SlabPool::reallocate`] / See [`SlabPool::reallocate`].
pub unsafe fn realloc(ptr: *mut u8, size: usize) -> *mut u8 {
    unsafe { HEAP.pool().reallocate(ptr, size) }
}

/// # Safety
/// См. [`SlabPool::free`] / See [`SlabPool::free`].
pub unsafe fn free(ptr: *mut u8) {
    unsafe { HEAP.pool().free(ptr) }
}
