//! Kernel console macros.
//!
//! On bare metal these write to the serial port. Host builds (unit tests) forward to the
//! standard streams so test output stays readable.

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {{
        $crate::serial::_print(format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! println {
    () => {{
        $crate::serial::_print(format_args!("\n"));
    }};
    ($($arg:tt)*) => {{
        $crate::serial::_print(format_args!("{}\n", format_args!($($arg)*)));
    }};
}

#[macro_export]
macro_rules! eprint {
    ($($arg:tt)*) => {{
        $crate::serial::_eprint(format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! eprintln {
    () => {{
        $crate::serial::_eprint(format_args!("\n"));
    }};
    ($($arg:tt)*) => {{
        $crate::serial::_eprint(format_args!("{}\n", format_args!($($arg)*)));
    }};
}
