//! x86_64 platform: 4-level paging (PML4 → PDPT → PD → PT)

pub mod mm;

pub use mm::X86_64;
