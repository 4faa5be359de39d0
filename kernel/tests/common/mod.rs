//! Общий стенд для интеграционных тестов / Shared rig for the integration tests
//!
//! `TestMemory` — выровненный буфер хоста, изображающий физическую память с
//! базы `PHYS_BASE`; HHDM указывает прямо в буфер. Аллокатор кадров
//! first-fit, двойное освобождение — паника.
//! `TestMemory` is a page-aligned host buffer posing as physical memory from
//! `PHYS_BASE`; the HHDM points straight into it. The frame allocator is
//! first-fit and a double free panics.

#![allow(dead_code)]

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::cell::RefCell;
use std::ops::RangeInclusive;
use std::ptr;
use std::sync::Mutex;

use cupruxos_mm::arch::{Arch, X86_64};
use cupruxos_mm::mm::pmm::{FrameAllocator, PhysMem, PAGE_SIZE};
use cupruxos_mm::mm::{Hhdm, PhysAddr, VirtAddr};
use cupruxos_mm::{Caching, Flags, PageSize};

pub const PHYS_BASE: u64 = 0x10_0000;

pub struct TestMemory {
    base:   *mut u8,
    frames: usize,
    state:  Mutex<State>,
}

struct State {
    used:  Vec<bool>,
    count: usize,
    limit: Option<usize>,
}

// Буфер доступен только через аллокатор и HHDM.
// The buffer is only reached through the allocator and the HHDM.
unsafe impl Send for TestMemory {}
unsafe impl Sync for TestMemory {}

impl TestMemory {
    pub fn new(frames: usize) -> Self {
        let base = unsafe { alloc_zeroed(Self::layout(frames)) };
        assert!(!base.is_null(), "host out of memory");
        Self {
            base,
            frames,
            state: Mutex::new(State { used: vec![false; frames], count: 0, limit: None }),
        }
    }

    fn layout(frames: usize) -> Layout {
        Layout::from_size_align(frames * PAGE_SIZE, PAGE_SIZE).unwrap()
    }

    pub fn hhdm(&self) -> Hhdm {
        Hhdm::new((self.base as u64).wrapping_sub(PHYS_BASE))
    }

    pub fn phys(&self) -> PhysMem<'_> {
        PhysMem::new(self, self.hhdm())
    }

    /// Сейчас выделено кадров / Frames currently allocated
    pub fn allocated(&self) -> usize {
        self.state.lock().unwrap().count
    }

    /// Потолок одновременно выделенных кадров / Cap on frames allocated at once
    pub fn set_limit(&self, limit: Option<usize>) {
        self.state.lock().unwrap().limit = limit;
    }

    pub fn is_allocated(&self, addr: PhysAddr) -> bool {
        self.state.lock().unwrap().used[self.index(addr)]
    }

    pub fn read(&self, addr: PhysAddr) -> u64 {
        unsafe { ptr::read_volatile(self.hhdm().as_ptr::<u64>(addr)) }
    }

    pub fn write(&self, addr: PhysAddr, value: u64) {
        unsafe { ptr::write_volatile(self.hhdm().as_ptr::<u64>(addr), value) }
    }

    fn index(&self, addr: PhysAddr) -> usize {
        assert!(addr.is_aligned(PAGE_SIZE), "unaligned frame {:#x}", addr);
        let index = ((addr.as_u64() - PHYS_BASE) / PAGE_SIZE as u64) as usize;
        assert!(index < self.frames, "frame {:#x} outside the arena", addr);
        index
    }
}

impl FrameAllocator for TestMemory {
    fn alloc(&self, count: usize, zero: bool) -> Option<PhysAddr> {
        let mut state = self.state.lock().unwrap();
        if state.limit.is_some_and(|limit| state.count + count > limit) {
            return None;
        }

        let start = (0..=self.frames.checked_sub(count)?)
            .find(|&start| state.used[start..start + count].iter().all(|used| !used))?;
        state.used[start..start + count].fill(true);
        state.count += count;

        let addr = PhysAddr::new(PHYS_BASE + (start * PAGE_SIZE) as u64);
        if zero {
            unsafe { ptr::write_bytes(self.hhdm().as_ptr::<u8>(addr), 0, count * PAGE_SIZE) };
        } else {
            // Мусор, чтобы поймать чтение необнулённого кадра.
            // Garbage, to catch reads of a frame that was not zeroed.
            unsafe { ptr::write_bytes(self.hhdm().as_ptr::<u8>(addr), 0xA5, count * PAGE_SIZE) };
        }
        Some(addr)
    }

    fn free(&self, addr: PhysAddr, count: usize) {
        let start = self.index(addr);
        let mut state = self.state.lock().unwrap();
        for index in start..start + count {
            assert!(state.used[index], "double free of frame {:#x}", addr.as_u64() + ((index - start) * PAGE_SIZE) as u64);
            state.used[index] = false;
        }
        state.count -= count;
    }
}

impl Drop for TestMemory {
    fn drop(&mut self) {
        unsafe { dealloc(self.base, Self::layout(self.frames)) };
    }
}

thread_local! {
    static INVALIDATED: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

/// x86_64, который записывает каждый сброс TLB своего потока.
/// x86_64 that records every TLB flush made by its thread.
#[derive(Debug, Clone, Copy)]
pub struct Recording;

impl Recording {
    pub fn take() -> Vec<u64> {
        INVALIDATED.with(|log| std::mem::take(&mut *log.borrow_mut()))
    }
}

impl Arch for Recording {
    const LEVELS: usize = X86_64::LEVELS;
    const USER_ROOT_ENTRIES: usize = X86_64::USER_ROOT_ENTRIES;
    const VALID_TABLE: u64 = X86_64::VALID_TABLE;
    const NEW_TABLE: u64 = X86_64::NEW_TABLE;
    const ADDR_MASK: u64 = X86_64::ADDR_MASK;

    fn is_large(raw: u64) -> bool { X86_64::is_large(raw) }
    fn get_addr(raw: u64) -> PhysAddr { X86_64::get_addr(raw) }
    fn set_addr(raw: u64, addr: PhysAddr) -> u64 { X86_64::set_addr(raw, addr) }

    fn to_arch(flags: Flags, caching: Caching, psize: PageSize) -> u64 {
        X86_64::to_arch(flags, caching, psize)
    }

    fn from_arch(raw: u64, psize: PageSize) -> (Flags, Caching) {
        X86_64::from_arch(raw, psize)
    }

    fn is_canonical(addr: u64) -> bool { X86_64::is_canonical(addr) }
    fn kernel_range() -> RangeInclusive<u64> { X86_64::kernel_range() }
    fn user_range() -> RangeInclusive<u64> { X86_64::user_range() }

    fn invalidate(vaddr: VirtAddr) {
        INVALIDATED.with(|log| log.borrow_mut().push(vaddr.as_u64()));
    }

    unsafe fn load(_root: PhysAddr) {}
}

pub const GIB: usize = 1 << 30;
pub const MIB: usize = 1 << 20;
pub const KIB: usize = 1 << 10;
