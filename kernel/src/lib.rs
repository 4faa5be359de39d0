//! CupruxOS memory core: page tables + kernel heap
//!
//! Ядро управления памятью: дерево таблиц страниц (PageMap) и slab-куча поверх него.
//! Memory-management core: the page-table tree (PageMap) and the slab heap on top of it.
//!
//! Всё, что требует привилегий, собирается только для `target_os = "none"`;
//! на хосте крейт собирается с `std` для тестов.
//! Anything privileged is only built for `target_os = "none"`;
//! on a host the crate links `std` for tests.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

// Box, Vec и т.д. для куч и тестов / Box, Vec etc. for heaps and tests
extern crate alloc;

pub mod arch;
pub mod drivers;
pub mod logger;
pub mod mm;

pub use mm::pagemap::PageMap;
pub use mm::vmm::{Caching, Error, Flags, PageSize};
