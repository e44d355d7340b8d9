//! Console output macros.
//!
//! The actual byte sink (serial UART, VGA text buffer) is out of scope for
//! this kernel — see [`crate::log_sink`] for the narrow [`Writer`] trait a
//! boot-glue crate plugs a real device into. These macros just forward
//! through that sink so kernel code never depends on a concrete device.

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::log_sink::_print(format_args!($($arg)*)));
}

#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}
