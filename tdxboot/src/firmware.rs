// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! Firmware entry: every unit lands in `_start` from the reset vector.

extern crate alloc;

use alloc::boxed::Box;
use core::slice;

use linked_list_allocator::LockedHeap;
use log::{LevelFilter, error, info, warn};

use tdxstart::arch::x86_64::serial::{init_com1, init_logger};
use tdxstart::arch::x86_64::{FwCfg, TdInfo, TdVmcallPort, TdxAcceptor, td_info};
use tdxstart::config::{DEFAULT_CHUNK_SIZE, NoPayload};
use tdxstart::hob::{BootMode, HobBuilder, HobList, Record, validate};
use tdxstart::measure::{
    MeasurementLog, MeasurementSink, config_volume_event, firmware_volume_event, handoff_event,
};
use tdxstart::mem::PageLevel;
use tdxstart::mem::accept::ap_main;
use tdxstart::mp::{ApExit, MAILBOX_SIZE, Mailbox, parked_loop, relocate_units};
use tdxstart::pool::{FirmwarePool, HOB_AREA_PAGES, init_heap};
use tdxstart::{
    BootContext, BootError, BudgetPolicy, FirmwareRecords, PlatformConfig, PlatformLayout,
    append_firmware_records, process_hob_list, println, transfer_hob_list,
};

/* ---- image layout, fixed when the firmware is built ---- */

const TD_MAILBOX_BASE: u64 = 0x0080_0000;
const TD_HOB_BASE: u64 = 0x0080_9000;
const TD_HOB_SIZE: u64 = 0x0000_2000;

const CFV_BASE: u64 = 0xFF00_0000;
const CFV_SIZE: u64 = 0x0008_4000;
/// Bytes of the configuration volume that carry data.
const CFV_RAW_SIZE: u64 = 0x0004_0000;
const BFV_BASE: u64 = 0xFF08_4000;
const BFV_SIZE: u64 = 0x00F7_C000;

const VOLUMES: [(u64, u64); 2] = [(CFV_BASE, CFV_SIZE), (BFV_BASE, BFV_SIZE)];

/// 0 MiB accepts everything.
const ACCEPT_BUDGET: BudgetPolicy = BudgetPolicy::Partial { mib: 0 };

#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    println!("\n*** TDXBOOT PANIC ***\n{}", info);
    halt()
}

fn halt() -> ! {
    loop {
        x86_64::instructions::hlt();
    }
}

#[cold]
fn die(msg: &core::fmt::Arguments) -> ! {
    error!("[fatal] {}", msg);
    println!("[serial][FATAL] abort");
    halt()
}

fn log_step(msg: &str) {
    info!("[step] {msg}");
}

/// The reset vector passes the unit's view of the handoff list base in
/// `rdi`, or 0 for the built-in location; only the bootstrap unit uses it.
#[unsafe(no_mangle)]
pub extern "C" fn _start(hob_base: u64) -> ! {
    x86_64::instructions::interrupts::disable();
    let hob_base = if hob_base == 0 { TD_HOB_BASE } else { hob_base };
    let info = td_info();
    let layout = PlatformLayout::new(TD_MAILBOX_BASE, hob_base, TD_HOB_SIZE)
        .unwrap_or_else(|e| die(&format_args!("layout: {e}")));
    let config = PlatformConfig::new(
        info.num_units,
        PageLevel::Size2M,
        DEFAULT_CHUNK_SIZE,
        ACCEPT_BUDGET,
    )
    .unwrap_or_else(|e| die(&format_args!("config: {e}")));
    // SAFETY: the mailbox page is part of the measured image layout and is
    // zeroed and accepted before any unit runs.
    let mailbox = unsafe { Mailbox::from_address(layout.mailbox_base) };
    let acceptor = TdxAcceptor;
    let ctx = BootContext::new(mailbox, config, &acceptor);

    if info.unit_index != 0 {
        ap_entry(&ctx, info.unit_index)
    }
    bsp_entry(&ctx, &layout, info)
}

fn leave(exit: ApExit) -> ! {
    match exit {
        ApExit::Wakeup { vector, arg } => {
            // SAFETY: vectors are published only by the bootstrap unit, which
            // owns the code they point at.
            let entry: extern "C" fn(u64) -> ! = unsafe { core::mem::transmute(vector) };
            entry(arg)
        }
        ApExit::Sleep => halt(),
    }
}

fn ap_entry(ctx: &BootContext<'_, TdxAcceptor>, unit: u32) -> ! {
    leave(ap_main(ctx, unit))
}

/// Where secondary units land after relocation; `mailbox` is the new page.
extern "C" fn relocated_ap_entry(mailbox: u64) -> ! {
    let unit = td_info().unit_index;
    // SAFETY: the bootstrap unit initialised this page before sending the
    // Wakeup that brought us here.
    let mb = unsafe { Mailbox::from_address(mailbox) };
    leave(parked_loop(mb, unit))
}

/// What the bootstrap unit hands to the next stage.
struct Handoff {
    list: &'static [u8],
    mailbox: &'static Mailbox,
}

fn bsp_entry(ctx: &BootContext<'_, TdxAcceptor>, layout: &PlatformLayout, info: TdInfo) -> ! {
    init_com1();
    init_logger(LevelFilter::Info);
    println!(">>> tdxboot entry, {} unit(s)", info.num_units);

    match boot(ctx, layout, info.gpaw) {
        Ok(handoff) => {
            let relocated = handoff.mailbox as *const Mailbox as u64;
            relocate_units(
                ctx.mailbox,
                ctx.num_units(),
                relocated_ap_entry as usize as u64,
                relocated,
            );
            info!(
                "[boot] handoff list at {:#x}, {} bytes; units parked on {:#x}",
                handoff.list.as_ptr() as u64,
                handoff.list.len(),
                relocated
            );
            halt()
        }
        Err(e) => die(&format_args!("{e}")),
    }
}

fn boot_mode(list: &HobList<'_>) -> BootMode {
    list.records()
        .find_map(|r| match r {
            Record::Handoff(phit) => BootMode::from_raw(phit.boot_mode),
            _ => None,
        })
        .unwrap_or(BootMode::FullConfiguration)
}

/// Image bytes of a firmware volume in the read-only flash mapping.
fn volume_bytes(base: u64, length: u64) -> &'static [u8] {
    // SAFETY: the flash window is mapped for the whole boot and never
    // written.
    unsafe { slice::from_raw_parts(base as *const u8, length as usize) }
}

fn boot(
    ctx: &BootContext<'_, TdxAcceptor>,
    layout: &PlatformLayout,
    gpaw: u8,
) -> Result<Handoff, BootError> {
    // SAFETY: the VMM placed the list in accepted memory at a fixed base;
    // validate() never reads past this bound.
    let input: &'static [u8] = unsafe {
        slice::from_raw_parts(
            layout.hob_base as *const u8,
            layout.hob_region_size as usize,
        )
    };
    let list = validate(input)?;
    log_step("handoff list ok");

    let mut fw_cfg = FwCfg::new(TdVmcallPort);
    let budget = if fw_cfg.is_present() {
        ctx.config.acceptance_budget(&mut fw_cfg)?
    } else {
        warn!("[boot] no fw_cfg device, assuming no preloaded payloads");
        ctx.config.acceptance_budget(&mut NoPayload)?
    };
    let acc = process_hob_list(ctx, &list, budget)?;
    log_step("memory accepted");

    let reserved = [
        (layout.mailbox_base, MAILBOX_SIZE as u64),
        (layout.hob_base, layout.hob_region_size),
        VOLUMES[0],
        VOLUMES[1],
    ];
    let pool = FirmwarePool::carve(acc.low_region, HOB_AREA_PAGES, &reserved)?;
    // SAFETY: the heap range was just accepted and carve() kept it clear of
    // every page still in use.
    unsafe { init_heap(&ALLOCATOR, pool.heap) };
    // SAFETY: as above; nothing references these pages yet.
    let mailbox = unsafe { Mailbox::init_at(pool.mailbox.start) };

    let mut events = Box::new(MeasurementLog::new());
    events.submit(handoff_event(&list, layout.hob_base)?)?;
    events.submit(config_volume_event(
        CFV_BASE,
        volume_bytes(CFV_BASE, CFV_SIZE),
        CFV_RAW_SIZE,
    )?)?;
    events.submit(firmware_volume_event(
        BFV_BASE,
        BFV_SIZE,
        volume_bytes(BFV_BASE, BFV_SIZE),
    )?)?;
    log_step("measurements queued");

    // SAFETY: carve() placed the list area in accepted memory, clear of the
    // heap, the mailboxes and the input list this still reads from.
    let out = unsafe {
        slice::from_raw_parts_mut(
            pool.hob_area.start as *mut u8,
            pool.hob_area.length as usize,
        )
    };
    let mut builder = HobBuilder::new(out, pool.hob_area.start, boot_mode(&list))?;
    transfer_hob_list(&list, acc.budget, &mut builder)?;
    append_firmware_records(
        &FirmwareRecords {
            gpaw,
            volumes: &VOLUMES,
            mailbox: (pool.mailbox.start, pool.mailbox.length),
        },
        &mut builder,
    )?;
    events.emit_hobs(&mut builder)?;
    let list = builder.finish();
    log_step("handoff list rebuilt");
    Ok(Handoff { list, mailbox })
}
