//! riscv64 platform: Sv48 paging

pub mod mm;

pub use mm::Sv48;
