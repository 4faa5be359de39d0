//! UART Serial driver: COM1 (0x3F8)
//!
//! Приёмник логгера ядра на x86_64. В QEMU: `-serial stdio`.
//! Kernel logger sink on x86_64. In QEMU: `-serial stdio`.

use core::fmt;
use spin::Mutex;

const COM1: u16 = 0x3F8;

/// Регистр состояния линии, бит «передатчик пуст».
/// Line status register, "transmitter empty" bit.
const LSR_THR_EMPTY: u8 = 0x20;

unsafe fn outb(port: u16, val: u8) {
    unsafe { core::arch::asm!("out dx, al", in("dx") port, in("al") val, options(nomem, nostack)) };
}

unsafe fn inb(port: u16) -> u8 {
    let val: u8;
    unsafe { core::arch::asm!("in al, dx", out("al") val, in("dx") port, options(nomem, nostack)) };
    val
}

/// Порт 16550 / A 16550 port
pub struct Serial {
    port: u16,
}

impl Serial {
    pub const fn new(port: u16) -> Self {
        Self { port }
    }

    /// 115200 baud, 8N1, FIFO включён / 115200 baud, 8N1, FIFO on.
    pub fn init(&mut self) {
        let port = self.port;
        // SAFETY: порты 16550; ядро владеет ими единолично
        // SAFETY: 16550 ports; the kernel owns them exclusively
        unsafe {
            outb(port + 1, 0x00); // Отключить прерывания / Disable interrupts
            outb(port + 3, 0x80); // DLAB
            outb(port,     0x01); // Делитель 1 → 115200 baud
            outb(port + 1, 0x00);
            outb(port + 3, 0x03); // 8 бит, нет чётности, 1 стоп-бит
            outb(port + 2, 0xC7); // FIFO, clear, 14-byte threshold
            outb(port + 4, 0x03); // DTR + RTS, без IRQ / no IRQ
        }
    }

    fn send_byte(&mut self, byte: u8) {
        // SAFETY: см. init / see init
        unsafe {
            while inb(self.port + 5) & LSR_THR_EMPTY == 0 {}
            outb(self.port, byte);
        }
    }
}

impl fmt::Write for Serial {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.send_byte(b'\r');
            }
            self.send_byte(byte);
        }
        Ok(())
    }
}

static SERIAL: Mutex<Serial> = Mutex::new(Serial::new(COM1));

pub fn init() {
    SERIAL.lock().init();
}

/// Приёмник для [`crate::logger::init`] / Sink for [`crate::logger::init`].
pub fn print_args(args: fmt::Arguments<'_>) {
    use fmt::Write;
    SERIAL.lock().write_fmt(args).ok();
}
