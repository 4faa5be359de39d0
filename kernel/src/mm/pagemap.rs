//! PageMap — дерево таблиц страниц одного адресного пространства.
//! PageMap: the page-table tree of one address space.
//!
//! Каждая публичная операция — одна критическая секция под мьютексом PageMap:
//! без сна, без ввода-вывода, ограниченное число шагов по глубине дерева.
//! Every public operation is one critical section under the PageMap's mutex:
//! no sleeping, no I/O, bounded by the tree depth.
//!
//! Таблицы адресуются физическим адресом и читаются через HHDM; владение
//! таблицей задаётся только её местом в дереве.
//! Tables are addressed by physical address and read through the HHDM;
//! a table's owner is given only by its position in the tree.

use core::marker::PhantomData;
use core::ops::Range;

use spin::Mutex;

use super::pmm::{PhysMem, PAGE_SIZE};
use super::table::{Entry, Slot, Table, ENTRIES};
use super::vmm::{max_page_size, Caching, Error, Flags, PageSize, Result};
use super::{PhysAddr, VirtAddr};
use crate::arch::{self, Arch};

/// Самое глубокое дерево, которое умеет разбирать освобождение.
/// Deepest tree the teardown worklist can hold.
const MAX_LEVELS: usize = 5;

/// Ядерный (общий, вечный) или пользовательский PageMap.
/// Kernel (shared, never destroyed) or user PageMap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Space {
    Kernel,
    User,
}

/// Результат [`PageMap::query`] / Result of [`PageMap::query`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    /// Физический адрес запрошенного байта / Physical address of the queried byte
    pub phys:    PhysAddr,
    pub size:    PageSize,
    pub flags:   Flags,
    pub caching: Caching,
}

/// Почему обход остановился раньше нужного уровня.
/// Why a walk stopped above the wanted level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Miss {
    /// Пустой слот на пути / Empty slot on the way
    Absent,
    /// Более крупный лист на пути, а делить нельзя / Coarser leaf on the way, splitting not allowed
    Large,
    /// Не хватило кадра под таблицу / No frame for a table
    NoMemory,
}

impl From<Miss> for Error {
    fn from(miss: Miss) -> Self {
        match miss {
            Miss::Absent   => Error::InvalidEntry,
            Miss::Large    => Error::AddrInUse,
            Miss::NoMemory => Error::OutOfMemory,
        }
    }
}

pub struct PageMap<'m, A: Arch = arch::Current> {
    root:  PhysAddr,
    space: Space,
    mem:   PhysMem<'m>,
    tree:  Mutex<Tree<'m, A>>,
}

impl<'m, A: Arch> PageMap<'m, A> {
    fn with_root(mem: PhysMem<'m>, space: Space) -> Result<Self> {
        assert!(
            A::LEVELS > PageSize::Large.level() && A::LEVELS <= MAX_LEVELS,
            "vmm: unsupported tree depth {}", A::LEVELS
        );

        let root = mem.frames.alloc(1, true).ok_or(Error::OutOfMemory)?;
        Ok(Self {
            root,
            space,
            mem,
            tree: Mutex::new(Tree { root, mem, _arch: PhantomData }),
        })
    }

    /// Ядерный PageMap. Все корневые слоты ядерной половины сразу получают
    /// таблицы, так что корень больше никогда не меняется и его можно делить.
    /// Kernel PageMap. Every kernel-half root slot gets a table up front, so
    /// the root never changes again and can be shared.
    pub fn new_kernel(mem: PhysMem<'m>) -> Result<Self> {
        let pagemap = Self::with_root(mem, Space::Kernel)?;
        {
            let mut tree = pagemap.tree.lock();
            let root = tree.root;
            let kernel_half = A::USER_ROOT_ENTRIES..ENTRIES;

            let populated = kernel_half.clone().try_for_each(|index| {
                tree.child(Slot { table: root, index }, true, false, A::LEVELS - 1).map(|_| ())
            });
            if let Err(miss) = populated {
                tree.free_tree(root, A::LEVELS - 1, kernel_half);
                return Err(miss.into());
            }
        }
        Ok(pagemap)
    }

    /// Пустое пользовательское пространство с общей ядерной половиной.
    /// Empty user space sharing the kernel half.
    pub fn new_user(kernel: &PageMap<'m, A>) -> Result<Self> {
        debug_assert_eq!(kernel.space, Space::Kernel);

        let pagemap = Self::with_root(kernel.mem, Space::User)?;
        {
            let mut src = kernel.tree.lock();
            let mut dst = pagemap.tree.lock();
            for index in A::USER_ROOT_ENTRIES..ENTRIES {
                let (addr, bits) = {
                    let entry = src.entry(Slot { table: kernel.root, index }).access::<A>();
                    (entry.addr(), entry.flags())
                };
                dst.entry(Slot { table: pagemap.root, index })
                    .access::<A>()
                    .clear()
                    .set_addr(addr)
                    .set_flags(bits, true)
                    .write();
            }
        }
        Ok(pagemap)
    }

    pub fn root(&self) -> PhysAddr {
        self.root
    }

    pub fn space(&self) -> Space {
        self.space
    }

    pub fn phys(&self) -> PhysMem<'m> {
        self.mem
    }

    /// Сделать этот PageMap активным на текущем ядре.
    /// Make this PageMap the active one on the current core.
    ///
    /// # Safety
    /// Карта должна отображать выполняющийся код, стек и HHDM.
    /// The map must cover the running code, the stack and the HHDM.
    pub unsafe fn load(&self) {
        unsafe { A::load(self.root) }
    }

    /// Отобразить `[vaddr, vaddr + length)` на `[paddr, ...)`. Всё или ничего.
    /// Map `[vaddr, vaddr + length)` onto `[paddr, ...)`. All or nothing.
    ///
    /// Без `psize` каждый шаг берёт наибольший размер, на который выровнены оба адреса.
    /// Without `psize` each step takes the largest size both addresses are aligned to.
    pub fn map(
        &self,
        vaddr: VirtAddr,
        paddr: PhysAddr,
        length: usize,
        flags: Flags,
        psize: Option<PageSize>,
        caching: Caching,
    ) -> Result<()> {
        let (length, psize) = check_range::<A>(&[vaddr.as_u64(), paddr.as_u64()], length, psize)?;
        self.check_space(vaddr, length)?;
        self.tree.lock().map(vaddr, paddr, length, flags, psize, caching)
    }

    /// Выделить обнулённые кадры и отобразить их (по умолчанию страницами 4 KiB).
    /// Allocate zeroed frames and map them (4 KiB pages by default).
    ///
    /// При ошибке всё отображённое этим вызовом снимается, а кадры возвращаются.
    /// On failure everything this call mapped is unmapped and its frames released.
    pub fn map_alloc(
        &self,
        vaddr: VirtAddr,
        length: usize,
        flags: Flags,
        psize: Option<PageSize>,
    ) -> Result<()> {
        let psize = psize.unwrap_or(PageSize::Small);
        let (length, psize) = check_range::<A>(&[vaddr.as_u64()], length, Some(psize))?;
        let psize = psize.unwrap_or(PageSize::Small);
        self.check_space(vaddr, length)?;
        self.tree.lock().map_alloc(vaddr, length, flags, psize)
    }

    /// Переписать права существующих листьев. Никогда не делит страницы.
    /// Rewrite the permissions of existing leaves. Never splits.
    pub fn protect(
        &self,
        vaddr: VirtAddr,
        length: usize,
        flags: Flags,
        psize: Option<PageSize>,
        caching: Caching,
    ) -> Result<()> {
        let (length, psize) = check_range::<A>(&[vaddr.as_u64()], length, psize)?;
        self.check_space(vaddr, length)?;
        let mut tree = self.tree.lock();

        // Сначала проверяем весь диапазон, потом пишем.
        // Check the whole range first, then write.
        tree.protect(vaddr, length, flags, psize, caching, false)?;
        tree.protect(vaddr, length, flags, psize, caching, true)
    }

    /// Снять отображения. Пустые участки диапазона пропускаются.
    /// Remove mappings. Empty parts of the range are skipped.
    pub fn unmap(&self, vaddr: VirtAddr, length: usize, psize: Option<PageSize>) -> Result<()> {
        let (length, psize) = check_range::<A>(&[vaddr.as_u64()], length, psize)?;
        self.check_space(vaddr, length)?;
        self.tree.lock().unmap(vaddr, length, psize)
    }

    /// Физический адрес листа ровно размера `psize`, отображающего `vaddr`.
    /// Physical address of the leaf of exactly `psize` mapping `vaddr`.
    pub fn translate(&self, vaddr: VirtAddr, psize: PageSize) -> Result<PhysAddr> {
        let psize = psize.fixed::<A>();
        if !vaddr.is_aligned(psize.bytes()) {
            return Err(Error::AddrNotAligned);
        }
        self.tree.lock().translate(vaddr, psize)
    }

    /// Найти лист любого размера, отображающий `vaddr`.
    /// Find the leaf of any size that maps `vaddr`.
    pub fn query(&self, vaddr: VirtAddr) -> Option<Mapping> {
        self.tree.lock().query(vaddr)
    }

    /// Пользовательский PageMap не меняет общую ядерную половину.
    /// A user PageMap never changes the shared kernel half.
    fn check_space(&self, vaddr: VirtAddr, length: usize) -> Result<()> {
        if self.space != Space::User || length == 0 {
            return Ok(());
        }
        // check_range уже проверил, что конец не переполняется
        // check_range already made sure the end does not overflow
        let last = vaddr.as_u64() + (length as u64 - 1);
        let kernel = A::kernel_range();
        if last >= *kernel.start() && vaddr.as_u64() <= *kernel.end() {
            return Err(Error::InvalidRange);
        }
        Ok(())
    }
}

impl<A: Arch> Drop for PageMap<'_, A> {
    fn drop(&mut self) {
        // Ядерная половина общая — её не трогаем.
        // The kernel half is shared, leave it alone.
        if self.space != Space::User {
            return;
        }

        log::warn!("destroying a pagemap");
        let tree = self.tree.get_mut();
        let root = tree.root;
        tree.free_tree(root, A::LEVELS - 1, 0..A::USER_ROOT_ENTRIES);
    }
}

/// Проверить выравнивание и границы до взятия блокировки; вернуть длину,
/// округлённую до 4 KiB.
/// Check alignment and bounds before taking the lock; return the length
/// rounded up to 4 KiB.
///
/// Диапазон может заканчиваться ровно на вершине адресного пространства, но не за ней.
/// A range may end exactly at the top of the address space, not past it.
fn check_range<A: Arch>(
    addrs: &[u64],
    length: usize,
    psize: Option<PageSize>,
) -> Result<(usize, Option<PageSize>)> {
    let psize = psize.map(PageSize::fixed::<A>);
    let align = psize.map_or(PAGE_SIZE, PageSize::bytes);
    let length = length.checked_next_multiple_of(PAGE_SIZE).ok_or(Error::AddrNotAligned)?;

    let addr_bits = addrs.iter().fold(0, |bits, addr| bits | addr);
    if addr_bits % align as u64 != 0 || length % align != 0 {
        return Err(Error::AddrNotAligned);
    }
    if length > 0 && addrs.iter().any(|addr| addr.checked_add(length as u64 - 1).is_none()) {
        return Err(Error::InvalidRange);
    }
    Ok((length, psize))
}

/// Размер очередного шага: заданный или наибольший подходящий.
/// Size of the next step: the requested one or the largest that fits.
fn step<A: Arch>(addr_bits: u64, remaining: usize, psize: Option<PageSize>) -> Result<PageSize> {
    let max = max_page_size(addr_bits, remaining)
        .ok_or(Error::AddrNotAligned)?
        .fixed::<A>();
    match psize {
        Some(psize) if psize > max => Err(Error::AddrNotAligned),
        Some(psize) => Ok(psize),
        None => Ok(max),
    }
}

/// Кадр рабочего стека освобождения / Teardown worklist frame
#[derive(Clone, Copy)]
struct Frame {
    table: PhysAddr,
    level: usize,
    next:  usize,
    end:   usize,
}

/// Состояние под мьютексом PageMap / State behind the PageMap mutex
struct Tree<'m, A: Arch> {
    root:  PhysAddr,
    mem:   PhysMem<'m>,
    _arch: PhantomData<fn() -> A>,
}

impl<A: Arch> Tree<'_, A> {
    /// # Safety
    /// `paddr` — живая таблица этого дерева (или свежий кадр), блокировка взята,
    /// и других ссылок на неё нет.
    /// `paddr` is a live table of this tree (or a fresh frame), the lock is held,
    /// and nothing else references it.
    unsafe fn table<'t>(&self, paddr: PhysAddr) -> &'t mut Table {
        unsafe { &mut *self.mem.hhdm.as_ptr::<Table>(paddr) }
    }

    fn entry(&mut self, slot: Slot) -> &mut Entry {
        // SAFETY: слоты берутся только из обходов этого дерева под его блокировкой
        // SAFETY: slots only come from walks of this tree under its lock
        unsafe { &mut self.table(slot.table).entries[slot.index] }
    }

    fn alloc_table(&mut self) -> core::result::Result<PhysAddr, Miss> {
        self.mem.frames.alloc(1, true).ok_or(Miss::NoMemory)
    }

    fn free_table(&mut self, table: PhysAddr) {
        self.mem.frames.free(table, 1);
    }

    /// Дочерняя таблица записи `slot`, лежащей на уровне `level`.
    /// Child table of the entry at `slot`, which sits at `level`.
    ///
    /// Пустой слот заполняется при `allocate`; крупный лист делится при
    /// `allocate` или `split` — все 512 записей копируют исходную трансляцию
    /// до того, как родитель начнёт указывать на новую таблицу.
    /// An empty slot is filled when `allocate`; a coarser leaf is split when
    /// `allocate` or `split`; all 512 entries replicate the original
    /// translation before the parent is pointed at the new table.
    fn child(
        &mut self,
        slot: Slot,
        allocate: bool,
        split: bool,
        level: usize,
    ) -> core::result::Result<PhysAddr, Miss> {
        let (present, large, addr, bits) = {
            let entry = self.entry(slot).access::<A>();
            (entry.is_present(), entry.is_large(), entry.addr(), entry.flags())
        };

        if !present {
            if !allocate {
                return Err(Miss::Absent);
            }
            let table = self.alloc_table()?;
            self.entry(slot)
                .access::<A>()
                .clear()
                .set_addr(table)
                .set_flags(A::NEW_TABLE, true)
                .write();
            return Ok(table);
        }

        if !large {
            return Ok(addr);
        }
        if !allocate && !split {
            return Err(Miss::Large);
        }

        let sizes = PageSize::from_level(level).and_then(|psize| psize.smaller().map(|s| (psize, s)));
        let Some((psize, smaller)) = sizes else {
            panic!("vmm: leaf entry at level {} cannot be split", level);
        };

        let (flags, caching) = A::from_arch(bits, psize);
        let leaf = A::to_arch(flags, caching, smaller);
        let step = smaller.bytes();

        let table = self.alloc_table()?;
        // SAFETY: свежий кадр, из дерева ещё не достижим
        // SAFETY: fresh frame, not yet reachable from the tree
        let child = unsafe { self.table(table) };
        for (i, entry) in child.entries.iter_mut().enumerate() {
            entry
                .access::<A>()
                .clear()
                .set_addr(addr + i * step)
                .set_flags(leaf, true)
                .write();
        }

        self.entry(slot)
            .access::<A>()
            .clear()
            .set_addr(table)
            .set_flags(A::NEW_TABLE, true)
            .write();
        Ok(table)
    }

    /// Слот листа размера `psize` для `vaddr`; ровно `LEVELS` шагов, без рекурсии.
    /// Leaf slot of size `psize` for `vaddr`; exactly `LEVELS` steps, no recursion.
    fn locate(
        &mut self,
        vaddr: VirtAddr,
        psize: PageSize,
        allocate: bool,
        split: bool,
    ) -> core::result::Result<Slot, Miss> {
        let mut table = self.root;
        for level in (psize.level() + 1..A::LEVELS).rev() {
            table = self.child(Slot::new(table, vaddr.as_u64(), level), allocate, split, level)?;
        }
        Ok(Slot::new(table, vaddr.as_u64(), psize.level()))
    }

    /// Лист любого размера, через который транслируется `vaddr`.
    /// The leaf of whatever size `vaddr` translates through.
    fn leaf_of(&mut self, vaddr: VirtAddr) -> Option<(Slot, PageSize)> {
        let mut table = self.root;
        for level in (0..A::LEVELS).rev() {
            let slot = Slot::new(table, vaddr.as_u64(), level);
            let entry = self.entry(slot).access::<A>();
            if !entry.is_present() {
                return None;
            }
            if level == 0 || entry.is_large() {
                return PageSize::from_level(level).map(|psize| (slot, psize));
            }
            table = entry.addr();
        }
        None
    }

    fn map(
        &mut self,
        vaddr: VirtAddr,
        paddr: PhysAddr,
        length: usize,
        flags: Flags,
        psize: Option<PageSize>,
        caching: Caching,
    ) -> Result<()> {
        let mut done = 0;
        while done < length {
            match self.map_step(vaddr + done, paddr + done, length - done, flags, psize, caching) {
                Ok(size) => done += size.bytes(),
                Err(err) => {
                    // Мы уже под блокировкой — откат идёт напрямую через дерево.
                    // We already hold the lock, so roll back straight through the tree.
                    let _ = self.unmap(vaddr, done, psize);
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    fn map_step(
        &mut self,
        vaddr: VirtAddr,
        paddr: PhysAddr,
        remaining: usize,
        flags: Flags,
        psize: Option<PageSize>,
        caching: Caching,
    ) -> Result<PageSize> {
        let size = step::<A>(vaddr.as_u64() | paddr.as_u64(), remaining, psize)?;

        // Лист любого размера над `vaddr` занимает его; дерево при этом не трогаем.
        // A leaf of any size over `vaddr` already takes it; leave the tree untouched.
        if self.leaf_of(vaddr).is_some() {
            return Err(Error::AddrInUse);
        }
        let slot = self.locate(vaddr, size, true, false)?;

        let entry = self.entry(slot).access::<A>();
        if entry.is_present() {
            return Err(Error::AddrInUse);
        }
        entry
            .clear()
            .set_addr(paddr)
            .set_flags(A::to_arch(flags, caching, size), true)
            .write();
        A::invalidate(vaddr);
        Ok(size)
    }

    fn map_alloc(&mut self, vaddr: VirtAddr, length: usize, flags: Flags, psize: PageSize) -> Result<()> {
        let frames = psize.bytes() / PAGE_SIZE;
        let mut done = 0;
        while done < length {
            let Some(paddr) = self.mem.frames.alloc(frames, true) else {
                self.release(vaddr, done, psize);
                return Err(Error::OutOfMemory);
            };
            if let Err(err) = self.map_step(vaddr + done, paddr, psize.bytes(), flags, Some(psize), Caching::Normal) {
                self.mem.frames.free(paddr, frames);
                self.release(vaddr, done, psize);
                return Err(err);
            }
            done += psize.bytes();
        }
        Ok(())
    }

    /// Снять и освободить кадры, отображённые `map_alloc`.
    /// Unmap and free the frames `map_alloc` mapped.
    fn release(&mut self, vaddr: VirtAddr, length: usize, psize: PageSize) {
        let frames = psize.bytes() / PAGE_SIZE;
        for offset in (0..length).step_by(psize.bytes()) {
            let page = vaddr + offset;
            if let Ok(paddr) = self.translate(page, psize) {
                let _ = self.unmap(page, psize.bytes(), Some(psize));
                self.mem.frames.free(paddr, frames);
            }
        }
    }

    fn protect(
        &mut self,
        vaddr: VirtAddr,
        length: usize,
        flags: Flags,
        psize: Option<PageSize>,
        caching: Caching,
        apply: bool,
    ) -> Result<()> {
        let mut done = 0;
        while done < length {
            let page = vaddr + done;
            let (slot, size) = match psize {
                Some(psize) => (self.locate(page, psize, false, false)?, psize),
                None => self.leaf_of(page).ok_or(Error::InvalidEntry)?,
            };
            if size.bytes() > length - done || !page.is_aligned(size.bytes()) {
                return Err(Error::AddrInUse);
            }

            let entry = self.entry(slot).access::<A>();
            if !entry.is_present() {
                return Err(Error::InvalidEntry);
            }
            if size != PageSize::Small && !entry.is_large() {
                return Err(Error::AddrInUse);
            }

            if apply {
                entry
                    .clear_flags()
                    .set_flags(A::to_arch(flags, caching, size), true)
                    .write();
                A::invalidate(page);
            }
            done += size.bytes();
        }
        Ok(())
    }

    fn unmap(&mut self, vaddr: VirtAddr, length: usize, psize: Option<PageSize>) -> Result<()> {
        let mut done = 0;
        while done < length {
            let page = vaddr + done;
            let size = step::<A>(page.as_u64(), length - done, psize)?;
            match self.locate(page, size, false, true) {
                Ok(slot) => self.clear(slot, page, size),
                // Уже пусто — не ошибка / already empty is not an error
                Err(Miss::Absent) => A::invalidate(page),
                Err(miss) => return Err(miss.into()),
            }
            done += size.bytes();
        }
        Ok(())
    }

    fn clear(&mut self, slot: Slot, vaddr: VirtAddr, size: PageSize) {
        let (present, large, addr) = {
            let entry = self.entry(slot).access::<A>();
            (entry.is_present(), entry.is_large(), entry.addr())
        };
        self.entry(slot).access::<A>().clear().write();

        if present && !large && size != PageSize::Small {
            // Слот указывал на более мелкую таблицу: гасим каждую страницу и
            // освобождаем всё поддерево.
            // The slot pointed at a finer table: flush every page and free
            // the whole subtree.
            for offset in (0..size.bytes()).step_by(PAGE_SIZE) {
                A::invalidate(vaddr + offset);
            }
            self.free_tree(addr, size.level() - 1, 0..ENTRIES);
        } else {
            A::invalidate(vaddr);
        }
    }

    fn translate(&mut self, vaddr: VirtAddr, psize: PageSize) -> Result<PhysAddr> {
        let slot = self.locate(vaddr, psize, false, false).map_err(|_| Error::InvalidEntry)?;
        let entry = self.entry(slot).access::<A>();
        if !entry.is_present() || (psize != PageSize::Small && !entry.is_large()) {
            return Err(Error::InvalidEntry);
        }
        Ok(entry.addr())
    }

    fn query(&mut self, vaddr: VirtAddr) -> Option<Mapping> {
        let (slot, size) = self.leaf_of(vaddr)?;
        let entry = self.entry(slot).access::<A>();
        let (flags, caching) = A::from_arch(entry.flags(), size);
        let offset = vaddr.as_usize() & (size.bytes() - 1);
        Some(Mapping { phys: entry.addr() + offset, size, flags, caching })
    }

    fn child_table(&mut self, slot: Slot) -> Option<PhysAddr> {
        let entry = self.entry(slot).access::<A>();
        (entry.is_present() && !entry.is_large()).then(|| entry.addr())
    }

    /// Освободить `table` (уровня `level`) и всё, что достижимо из слотов `entries`,
    /// дети раньше родителей. Рабочий стек ограничен глубиной дерева.
    /// Free `table` (at `level`) and everything reachable from slots `entries`,
    /// children before parents. The worklist is bounded by the tree depth.
    fn free_tree(&mut self, table: PhysAddr, level: usize, entries: Range<usize>) {
        assert!(level < MAX_LEVELS, "vmm: tree deeper than {} levels", MAX_LEVELS);

        let mut stack = [Frame { table, level, next: entries.start, end: entries.end }; MAX_LEVELS];
        let mut depth = 1;

        while depth > 0 {
            let top = &mut stack[depth - 1];

            // На нижнем уровне только листья / the bottom level holds only leaves
            if top.level == 0 || top.next >= top.end {
                let table = top.table;
                depth -= 1;
                self.free_table(table);
                continue;
            }

            let slot = Slot { table: top.table, index: top.next };
            let level = top.level;
            top.next += 1;

            if let Some(child) = self.child_table(slot) {
                stack[depth] = Frame { table: child, level: level - 1, next: 0, end: ENTRIES };
                depth += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::X86_64;

    #[test]
    fn range_checks() {
        assert_eq!(check_range::<X86_64>(&[0x1000], 1, None), Ok((0x1000, None)));
        assert_eq!(check_range::<X86_64>(&[0x1800], 0x1000, None), Err(Error::AddrNotAligned));
        assert_eq!(check_range::<X86_64>(&[0x1000, 0x2800], 0x1000, None), Err(Error::AddrNotAligned));
        assert_eq!(
            check_range::<X86_64>(&[0x20_0000], 0x40_0000, Some(PageSize::Medium)),
            Ok((0x40_0000, Some(PageSize::Medium)))
        );
        assert_eq!(check_range::<X86_64>(&[0x20_0000], 0x1000, Some(PageSize::Medium)), Err(Error::AddrNotAligned));
        assert_eq!(check_range::<X86_64>(&[0x1000], usize::MAX, None), Err(Error::AddrNotAligned));
    }

    #[test]
    fn range_end_must_not_wrap() {
        let top = 0xFFFF_FFFF_FFFF_F000;
        assert_eq!(check_range::<X86_64>(&[top], 0x1000, None), Ok((0x1000, None)));
        assert_eq!(check_range::<X86_64>(&[top], 0x2000, None), Err(Error::InvalidRange));
        assert_eq!(check_range::<X86_64>(&[0x1000, top], 0x2000, None), Err(Error::InvalidRange));
        assert_eq!(check_range::<X86_64>(&[top], 0, None), Ok((0, None)));
    }

    #[test]
    fn step_sizes() {
        assert_eq!(step::<X86_64>(0x4000_0000, 0x4000_0000, None), Ok(PageSize::Large));
        assert_eq!(step::<X86_64>(0x4000_0000, 0x4000_0000, Some(PageSize::Small)), Ok(PageSize::Small));
        assert_eq!(step::<X86_64>(0x20_0000, 0x4000_0000, Some(PageSize::Large)), Err(Error::AddrNotAligned));
        assert_eq!(step::<X86_64>(0x1000, 0x800, None), Err(Error::AddrNotAligned));
    }

    #[test]
    fn miss_to_error() {
        assert_eq!(Error::from(Miss::Absent), Error::InvalidEntry);
        assert_eq!(Error::from(Miss::Large), Error::AddrInUse);
        assert_eq!(Error::from(Miss::NoMemory), Error::OutOfMemory);
    }
}
