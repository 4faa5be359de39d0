//! Разные PageMap не мешают друг другу; один PageMap сериализует вызовы.
//! Different PageMaps stay out of each other's way; one PageMap serializes calls.

mod common;

use common::{TestMemory, GIB};
use cupruxos_mm::arch::X86_64;
use cupruxos_mm::mm::pagemap::PageMap;
use cupruxos_mm::mm::pmm::PAGE_SIZE;
use cupruxos_mm::mm::{PhysAddr, VirtAddr};
use cupruxos_mm::{Caching, Error, Flags, PageSize};

const PAGES: u64 = 64;
const BASE: u64 = 0x40_0000;

fn page(base: u64, index: u64) -> u64 {
    base + index * PAGE_SIZE as u64
}

#[test]
fn user_maps_are_independent() {
    let mem = TestMemory::new(2048);
    let kernel = PageMap::<X86_64>::new_kernel(mem.phys()).unwrap();
    let users: Vec<_> = (0..4).map(|_| PageMap::new_user(&kernel).unwrap()).collect();

    std::thread::scope(|scope| {
        for (i, user) in users.iter().enumerate() {
            scope.spawn(move || {
                let phys = (i as u64 + 1) << 32;
                for index in 0..PAGES {
                    user.map(
                        VirtAddr::new(page(BASE, index)),
                        PhysAddr::new(page(phys, index)),
                        PAGE_SIZE,
                        Flags::RW | Flags::USER,
                        None,
                        Caching::Normal,
                    )
                    .unwrap();
                }
                user.unmap(VirtAddr::new(BASE), (PAGES as usize / 2) * PAGE_SIZE, None).unwrap();
            });
        }
    });

    // Одни и те же виртуальные адреса, у каждого свои кадры.
    // Same virtual addresses, each with its own frames.
    for (i, user) in users.iter().enumerate() {
        let phys = (i as u64 + 1) << 32;
        for index in 0..PAGES {
            let result = user.translate(VirtAddr::new(page(BASE, index)), PageSize::Small);
            if index < PAGES / 2 {
                assert_eq!(result, Err(Error::InvalidEntry));
            } else {
                assert_eq!(result, Ok(PhysAddr::new(page(phys, index))));
            }
        }
    }
}

#[test]
fn one_map_many_writers() {
    let mem = TestMemory::new(2048);
    let kernel = PageMap::<X86_64>::new_kernel(mem.phys()).unwrap();
    let window = |i: u64| 0xFFFF_9000_0000_0000 + i * GIB as u64;

    std::thread::scope(|scope| {
        for i in 0..4u64 {
            let kernel = &kernel;
            scope.spawn(move || {
                for index in 0..PAGES {
                    kernel
                        .map(
                            VirtAddr::new(page(window(i), index)),
                            PhysAddr::new(page(i << 24, index)),
                            PAGE_SIZE,
                            Flags::RWG,
                            None,
                            Caching::Normal,
                        )
                        .unwrap();
                    // Читатель берёт ту же блокировку / A reader takes the same lock
                    assert!(kernel.query(VirtAddr::new(page(window(i), index))).is_some());
                }
            });
        }
    });

    for i in 0..4u64 {
        for index in 0..PAGES {
            assert_eq!(
                kernel.translate(VirtAddr::new(page(window(i), index)), PageSize::Small),
                Ok(PhysAddr::new(page(i << 24, index)))
            );
        }
    }
}
