// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! COM1 console over TDVMCALL port I/O, plus the `log` backend.

use core::fmt::Write;
use log::{LevelFilter, Log, Metadata, Record};
use spin::Mutex;

use super::tdcall::{io_read8, io_write8};

const COM1: u16 = 0x3F8;
const LSR: u16 = COM1 + 5;
const LSR_THR_EMPTY: u8 = 0x20;

static COM1_LOCK: Mutex<()> = Mutex::new(());

pub fn init_com1() {
    io_write8(COM1 + 1, 0x00); // no interrupts
    io_write8(COM1 + 3, 0x80); // DLAB
    io_write8(COM1, 0x01); // 115200
    io_write8(COM1 + 1, 0x00);
    io_write8(COM1 + 3, 0x03); // 8N1
    io_write8(COM1 + 2, 0xC7); // FIFO on, cleared
}

fn send(b: u8) {
    // A VMM without a UART answers nothing; don't spin forever on it.
    for _ in 0..1024 {
        match io_read8(LSR) {
            Some(lsr) if lsr & LSR_THR_EMPTY == 0 => core::hint::spin_loop(),
            _ => break,
        }
    }
    io_write8(COM1, b);
}

fn _write_str(s: &str) {
    let _guard = COM1_LOCK.lock();
    for &b in s.as_bytes() {
        if b == b'\n' {
            send(b'\r');
        }
        send(b);
    }
}

pub struct Serial;
impl Write for Serial {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        _write_str(s);
        Ok(())
    }
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {{
        use core::fmt::Write;
        let _ = write!(&mut $crate::arch::x86_64::serial::Serial, $($arg)*);
    }};
}

#[macro_export]
macro_rules! println {
    () => { $crate::print!("\n") };
    ($fmt:literal $(, $($arg:tt)+)?) => {{
        $crate::print!(concat!($fmt, "\n") $(, $($arg)+)?);
    }};
}

struct SerialLogger;

impl Log for SerialLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if self.enabled(record.metadata()) {
            crate::println!("[{:<5}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: SerialLogger = SerialLogger;

/// Routes `log` output to COM1. Later calls only change the level.
pub fn init_logger(level: LevelFilter) {
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}
