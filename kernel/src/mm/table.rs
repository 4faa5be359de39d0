//! Узел дерева таблиц и доступ к записям.
//! Table-tree node and entry access.
//!
//! Дерево ходит по записям только через [`Accessor`]: он читает запись один раз,
//! собирает новое значение и публикует его одной volatile-записью в `write()`.
//! The tree only touches entries through [`Accessor`]: it reads the entry once,
//! builds the new value and publishes it with a single volatile store in `write()`.

use core::marker::PhantomData;
use core::ptr;

use super::PhysAddr;
use crate::arch::Arch;

/// Записей в таблице на любом уровне / Entries per table at every level
pub const ENTRIES: usize = 512;

/// Один слот таблицы: пусто, лист или указатель на дочернюю таблицу.
/// One table slot: empty, a leaf, or a pointer to a child table.
#[derive(Debug)]
#[repr(transparent)]
pub struct Entry(u64);

impl Entry {
    pub fn raw(&self) -> u64 {
        // SAFETY: выровненное чтение своего поля / aligned read of our own field
        unsafe { ptr::read_volatile(&self.0) }
    }

    pub fn access<A: Arch>(&mut self) -> Accessor<'_, A> {
        let value = self.raw();
        Accessor { entry: self, value, _arch: PhantomData }
    }
}

/// Построитель нового значения записи / Builder for an entry's new value.
pub struct Accessor<'e, A: Arch> {
    entry: &'e mut Entry,
    value: u64,
    _arch: PhantomData<A>,
}

impl<A: Arch> Accessor<'_, A> {
    pub fn clear(mut self) -> Self {
        self.value = 0;
        self
    }

    pub fn set_addr(mut self, addr: PhysAddr) -> Self {
        self.value = A::set_addr(self.value, addr);
        self
    }

    /// Поднять (`on`) или снять биты `bits`.
    /// Raise (`on`) or drop the bits in `bits`.
    pub fn set_flags(mut self, bits: u64, on: bool) -> Self {
        if on {
            self.value |= bits;
        } else {
            self.value &= !bits;
        }
        self
    }

    /// Снять все неадресные биты / Drop every non-address bit.
    pub fn clear_flags(mut self) -> Self {
        self.value &= A::ADDR_MASK;
        self
    }

    pub fn addr(&self) -> PhysAddr {
        A::get_addr(self.value)
    }

    pub fn flags(&self) -> u64 {
        self.value & !A::ADDR_MASK
    }

    pub fn has_flags(&self, mask: u64) -> bool {
        self.value & mask == mask
    }

    pub fn is_large(&self) -> bool {
        A::is_large(self.value)
    }

    /// Действительна и указывает на канонический адрес.
    /// Valid and pointing at a canonical address.
    pub fn is_present(&self) -> bool {
        self.has_flags(A::VALID_TABLE) && A::is_canonical(self.addr().as_u64())
    }

    pub fn write(self) {
        // SAFETY: `entry` — уникальная ссылка / `entry` is a unique reference
        unsafe { ptr::write_volatile(&mut self.entry.0, self.value) }
    }
}

/// Таблица из 512 записей, всегда полного размера.
/// A 512-entry table, always full-sized.
#[repr(C, align(4096))]
pub struct Table {
    pub entries: [Entry; ENTRIES],
}

/// Адрес слота: таблица (по физическому адресу) + индекс.
/// Slot address: table (by physical address) + index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub table: PhysAddr,
    pub index: usize,
}

impl Slot {
    /// Слот, через который `vaddr` проходит на уровне `level`.
    /// The slot `vaddr` passes through at `level`.
    pub const fn new(table: PhysAddr, vaddr: u64, level: usize) -> Self {
        let shift = 12 + 9 * level;
        Self { table, index: ((vaddr >> shift) as usize) & (ENTRIES - 1) }
    }
}
