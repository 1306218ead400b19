use core::fmt;

#[cfg(target_os = "none")]
mod port {
    use core::{arch::asm, fmt};

    pub struct SerialWriter {
        initialized: bool,
    }

    const IO_BASE: u16 = 0x3f8;
    const RBR: u16 = IO_BASE; // Receiver Buffer Reg (read-only)
    const THR: u16 = IO_BASE; // Transmitter Holding Reg (write-only)
    const IER: u16 = IO_BASE + 1; // Interrupt Enable Reg
    const FCR: u16 = IO_BASE + 2; // FIFO Control Reg (write-only)
    const LCR: u16 = IO_BASE + 3; // Line Control Register
    const MCR: u16 = IO_BASE + 4; // MODEM Control Register
    const LSR: u16 = IO_BASE + 5; // Line Status Register (read-only)

    unsafe fn outb(port: u16, byte: u8) {
        asm!("out dx, al", in("dx") port, in("al") byte)
    }

    unsafe fn inb(port: u16) -> u8 {
        let res: u8;
        asm!("in al, dx", in("dx") port, out("al") res);
        res
    }

    impl SerialWriter {
        fn ensure_initialized(&mut self) {
            if self.initialized {
                return;
            }

            // SAFETY: Follows the initialization sequence from
            // https://wiki.osdev.org/Serial_Ports#Initialization
            unsafe {
                outb(IER, 0x00);
                outb(LCR, 0x80);
                outb(THR, 0x03);
                outb(IER, 0x00);
                outb(LCR, 0x03);
                outb(FCR, 0xC7);
                outb(MCR, 0x0B);

                outb(MCR, 0x1E); // Enable loopback.

                const EXPECTED: u8 = 0xAE;
                outb(THR, EXPECTED);
                let actual = inb(RBR);
                assert!(
                    actual == EXPECTED,
                    "faulty serial, expected {EXPECTED:#X}, got {actual:#X}"
                );

                outb(MCR, 0x0F); // Disable loopback.
            }

            self.initialized = true;
        }
    }

    impl fmt::Write for SerialWriter {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            self.ensure_initialized();

            for b in s.bytes() {
                // SAFETY: Waits for the transmit buffer to drain before each byte.
                unsafe {
                    while inb(LSR) & 0x20 == 0 {}
                    outb(THR, b);
                }
            }

            Ok(())
        }
    }

    pub static mut SERIAL_WRITER: SerialWriter = SerialWriter { initialized: false };
}

#[cfg(target_os = "none")]
#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use core::fmt::Write;
    // SAFETY: Single core; console output is not reentrant.
    unsafe {
        let writer = &mut *core::ptr::addr_of_mut!(port::SERIAL_WRITER);
        let _ = writer.write_fmt(args);
    }
}

#[cfg(target_os = "none")]
#[doc(hidden)]
pub fn _eprint(args: fmt::Arguments) {
    _print(args);
}

#[cfg(not(target_os = "none"))]
#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    std::print!("{args}");
}

#[cfg(not(target_os = "none"))]
#[doc(hidden)]
pub fn _eprint(args: fmt::Arguments) {
    std::eprint!("{args}");
}
