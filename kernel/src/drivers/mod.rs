//! Kernel-space drivers
//!
//! Только то, что нужно логгеру ядра / Only what the kernel logger needs:
//!   - UART/Serial — отладочный вывод в терминал QEMU

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub mod uart;
