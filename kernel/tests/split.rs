//! Деление больших страниц сохраняет трансляцию соседей.
//! Splitting large pages keeps the neighbours' translation.

mod common;

use common::{TestMemory, GIB, MIB};
use cupruxos_mm::arch::{Arch, Sv48, X86_64};
use cupruxos_mm::mm::pagemap::PageMap;
use cupruxos_mm::mm::pmm::PAGE_SIZE;
use cupruxos_mm::mm::{PhysAddr, VirtAddr};
use cupruxos_mm::{Caching, Error, Flags, PageSize};

const ARENA: usize = 1024;

fn unmap_inside_a_gigabyte_leaf<A: Arch>() {
    let mem = TestMemory::new(ARENA);
    let pagemap = PageMap::<A>::new_kernel(mem.phys()).unwrap();

    let base = 0x4000_0000u64;
    let phys = 0x8000_0000u64;
    pagemap
        .map(VirtAddr::new(base), PhysAddr::new(phys), GIB, Flags::RW, Some(PageSize::Large), Caching::Mmio)
        .unwrap();
    let before = mem.allocated();

    let hole = base + 0x0123_4000;
    pagemap.unmap(VirtAddr::new(hole), PAGE_SIZE, Some(PageSize::Small)).unwrap();
    // Две новые таблицы: из 1 GiB в 2 MiB и из 2 MiB в 4 KiB.
    // Two new tables: 1 GiB into 2 MiB and 2 MiB into 4 KiB.
    assert_eq!(mem.allocated(), before + 2);
    assert_eq!(pagemap.query(VirtAddr::new(hole)), None);

    for (offset, size) in [
        (0u64, PageSize::Medium),
        (0x0120_0000, PageSize::Small),
        (0x0123_3000, PageSize::Small),
        (0x0123_5000, PageSize::Small),
        (0x0140_0000, PageSize::Medium),
        (0x3FFF_F123, PageSize::Medium),
    ] {
        let mapping = pagemap.query(VirtAddr::new(base + offset)).unwrap();
        assert_eq!(mapping.phys, PhysAddr::new(phys + offset), "offset {:#x}", offset);
        assert_eq!(mapping.size, size, "offset {:#x}", offset);
        assert_eq!(mapping.flags, Flags::RW);
        assert_eq!(mapping.caching, Caching::Mmio);
    }

    assert_eq!(pagemap.translate(VirtAddr::new(base), PageSize::Large), Err(Error::InvalidEntry));
    assert_eq!(pagemap.translate(VirtAddr::new(base), PageSize::Medium), Ok(PhysAddr::new(phys)));

    // Дыру можно занять другой страницей с другими правами.
    // The hole can take another page with other permissions.
    pagemap
        .map(VirtAddr::new(hole), PhysAddr::new(0x5000), PAGE_SIZE, Flags::READ | Flags::EXEC, None, Caching::Normal)
        .unwrap();
    let mapping = pagemap.query(VirtAddr::new(hole)).unwrap();
    assert_eq!((mapping.phys, mapping.flags, mapping.caching), (PhysAddr::new(0x5000), Flags::READ | Flags::EXEC, Caching::Normal));
    assert_eq!(pagemap.query(VirtAddr::new(hole + 0x1000)).unwrap().flags, Flags::RW);
}

#[test]
fn unmap_inside_a_gigabyte_leaf_x86_64() {
    unmap_inside_a_gigabyte_leaf::<X86_64>();
}

#[test]
fn unmap_inside_a_gigabyte_leaf_sv48() {
    unmap_inside_a_gigabyte_leaf::<Sv48>();
}

fn mapping_inside_a_leaf_leaves_it_whole<A: Arch>() {
    let mem = TestMemory::new(ARENA);
    let pagemap = PageMap::<A>::new_kernel(mem.phys()).unwrap();

    let base = 0x60_0000u64;
    pagemap
        .map(VirtAddr::new(base), PhysAddr::new(0x4000_0000), 2 * MIB, Flags::RWX, Some(PageSize::Medium), Caching::Normal)
        .unwrap();
    let before = mem.allocated();

    // Мелкая страница внутри большого листа уже занята, и лист не делится.
    // A small page inside the large leaf is already taken, and the leaf is not split.
    for psize in [None, Some(PageSize::Small)] {
        assert_eq!(
            pagemap.map(VirtAddr::new(base + 0x3000), PhysAddr::new(0x9000), PAGE_SIZE, Flags::READ, psize, Caching::Normal),
            Err(Error::AddrInUse)
        );
    }
    assert_eq!(mem.allocated(), before);
    assert_eq!(pagemap.translate(VirtAddr::new(base), PageSize::Medium), Ok(PhysAddr::new(0x4000_0000)));
    assert_eq!(pagemap.query(VirtAddr::new(base + 0x3000)).unwrap().size, PageSize::Medium);

    for offset in (0..2 * MIB as u64).step_by(64 * PAGE_SIZE) {
        let mapping = pagemap.query(VirtAddr::new(base + offset)).unwrap();
        assert_eq!(mapping.phys, PhysAddr::new(0x4000_0000 + offset));
        assert_eq!(mapping.flags, Flags::RWX);
    }
    assert_eq!(pagemap.translate(VirtAddr::new(base + 0x3000), PageSize::Small), Err(Error::InvalidEntry));

    // Снять одну страницу (лист делится) и занять её заново.
    // Unmap one page (the leaf gets split) and take it again.
    pagemap.unmap(VirtAddr::new(base + 0x3000), PAGE_SIZE, None).unwrap();
    pagemap
        .map(VirtAddr::new(base + 0x3000), PhysAddr::new(0x9000), PAGE_SIZE, Flags::READ, None, Caching::Normal)
        .unwrap();
    assert_eq!(pagemap.query(VirtAddr::new(base + 0x3000)).unwrap().flags, Flags::READ);
    assert_eq!(pagemap.query(VirtAddr::new(base + 0x2000)).unwrap().flags, Flags::RWX);
    assert_eq!(pagemap.query(VirtAddr::new(base + 0x4000)).unwrap().phys, PhysAddr::new(0x4000_4000));
    assert_eq!(pagemap.translate(VirtAddr::new(base + 0x4000), PageSize::Small), Ok(PhysAddr::new(0x4000_4000)));
}

#[test]
fn mapping_inside_a_leaf_leaves_it_whole_x86_64() {
    mapping_inside_a_leaf_leaves_it_whole::<X86_64>();
}

#[test]
fn mapping_inside_a_leaf_leaves_it_whole_sv48() {
    mapping_inside_a_leaf_leaves_it_whole::<Sv48>();
}

#[test]
fn protect_does_not_split() {
    let mem = TestMemory::new(ARENA);
    let pagemap = PageMap::<X86_64>::new_kernel(mem.phys()).unwrap();

    pagemap
        .map(VirtAddr::new(0x20_0000), PhysAddr::new(0x20_0000), 2 * MIB, Flags::RW, None, Caching::Normal)
        .unwrap();
    let before = mem.allocated();

    assert_eq!(
        pagemap.protect(VirtAddr::new(0x20_0000), PAGE_SIZE, Flags::READ, Some(PageSize::Small), Caching::Normal),
        Err(Error::AddrInUse)
    );
    assert_eq!(mem.allocated(), before);
    assert_eq!(pagemap.query(VirtAddr::new(0x20_0000)).unwrap().size, PageSize::Medium);
}
