//! HAL: Hardware Abstraction Layer
//!
//! Ядро памяти не знает раскладку битов записей: всё это за трейтом [`Arch`].
//! The memory core never knows entry bit layouts: all of it sits behind [`Arch`].
//!
//! Кодировщики чистые и собираются везде; привилегированные инструкции —
//! только на `target_os = "none"`.
//! Encoders are pure and build everywhere; privileged instructions only
//! on `target_os = "none"`.

use core::ops::RangeInclusive;

use crate::mm::vmm::{Caching, Flags, PageSize};
use crate::mm::{PhysAddr, VirtAddr};

pub mod riscv64;
pub mod x86_64;

pub use riscv64::Sv48;
pub use x86_64::X86_64;

/// Архитектура сборки / Architecture of the current build.
#[cfg(target_arch = "riscv64")]
pub use riscv64::Sv48 as Current;
/// Архитектура сборки / Architecture of the current build.
///
/// Хостовые сборки (тесты) тоже получают x86_64.
/// Hosted builds (tests) get x86_64 as well.
#[cfg(not(target_arch = "riscv64"))]
pub use x86_64::X86_64 as Current;

/// Возможности, которые архитектура даёт дереву таблиц.
/// Capabilities an architecture provides to the table tree.
pub trait Arch: 'static {
    /// Глубина дерева / Tree depth.
    const LEVELS: usize;

    /// Число корневых слотов, принадлежащих пользовательской половине (с начала таблицы).
    /// Number of root slots owned by the user half (counted from the start).
    const USER_ROOT_ENTRIES: usize;

    /// Биты, по которым запись считается действительной.
    /// Bits that make an entry valid.
    const VALID_TABLE: u64;

    /// Биты записи, указывающей на дочернюю таблицу.
    /// Bits of an entry pointing at a child table.
    const NEW_TABLE: u64;

    /// Маска адресных битов записи / Mask of the entry's address bits.
    const ADDR_MASK: u64;

    /// Запись — лист выше нижнего уровня.
    /// Entry is a leaf above the bottom level.
    fn is_large(raw: u64) -> bool;

    fn get_addr(raw: u64) -> PhysAddr;
    fn set_addr(raw: u64, addr: PhysAddr) -> u64;

    /// Переносимые флаги → аппаратные биты листа заданного размера.
    /// Portable flags → hardware leaf bits for the given size.
    fn to_arch(flags: Flags, caching: Caching, psize: PageSize) -> u64;

    /// Аппаратные биты листа → переносимые флаги.
    /// Hardware leaf bits → portable flags.
    fn from_arch(raw: u64, psize: PageSize) -> (Flags, Caching);

    fn is_canonical(addr: u64) -> bool;

    fn kernel_range() -> RangeInclusive<u64>;
    fn user_range() -> RangeInclusive<u64>;

    /// Поддерживает ли железо листья этого размера.
    /// Whether the hardware supports leaves of this size.
    fn supports(_psize: PageSize) -> bool {
        true
    }

    /// Сбросить трансляцию одной страницы из TLB.
    /// Drop one page's translation from the TLB.
    fn invalidate(vaddr: VirtAddr);

    /// Сделать дерево с корнем `root` активным на этом ядре.
    /// Make the tree rooted at `root` active on this core.
    ///
    /// # Safety
    /// Дерево должно отображать выполняющийся код, стек и HHDM.
    /// The tree must map the running code, the stack and the HHDM.
    unsafe fn load(root: PhysAddr);
}

/// 48-битный канонический адрес: биты 63..47 равны.
/// 48-bit canonical address: bits 63..47 are all equal.
pub(crate) const fn is_canonical_48(addr: u64) -> bool {
    let top = addr >> 47;
    top == 0 || top == 0x1_FFFF
}
