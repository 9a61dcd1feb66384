//! Diagnostics: the text dump and the raw pixel dump.

use super::slot_table::SlotTable;
use super::QueueCore;
use crate::buffer::SurfaceBuffer;
use std::fmt::Write;
use surface_core::utils::fs::write_bytes_to_file;
use tracing::{debug, warn};

fn join(sequences: impl Iterator<Item = u32>) -> String {
    sequences.map(|s| s.to_string()).collect::<Vec<_>>().join(", ")
}

/// Renders the queue header, the three lists and one line per slot.
pub(super) fn render(core: &QueueCore, table: &SlotTable, shared: bool) -> String {
    let mut out = String::new();
    // Writing to a String cannot fail.
    let _ = writeln!(
        out,
        "BufferQueue {} (unique id {:#x}): shared={} queue_size={} used_size={}",
        core.name(),
        core.unique_id(),
        shared,
        table.queue_size(),
        table.used_size()
    );
    let _ = writeln!(out, "  free list: [{}]", join(table.free_list()));
    let _ = writeln!(out, "  dirty list: [{}]", join(table.dirty_list()));
    let _ = writeln!(out, "  deleting list: [{}]", join(table.deleting_list()));
    for (sequence, slot) in table.iter() {
        let element = slot.element();
        let _ = writeln!(
            out,
            "  sequence {}: state={} pending_delete={} size={}x{} format={} fence={} damage={} timestamp={}",
            sequence,
            element.state,
            slot.is_pending_delete(),
            element.buffer.width(),
            element.buffer.height(),
            element.buffer.format().0,
            element.fence,
            element.damage,
            element.timestamp
        );
    }
    out
}

/// Writes the mapped pixels of a flushed buffer to
/// `<output_dir>/dumpimage-<pid>-<name>-<usec>.raw` while the sentinel file
/// exists. Failures are logged only.
pub(super) fn dump_to_file(core: &QueueCore, buffer: &SurfaceBuffer) {
    let config = core.dump_config();
    if !config.sentinel_path.exists() {
        return;
    }

    let usec = chrono::Utc::now().timestamp_micros();
    let path = config.output_dir.join(format!(
        "dumpimage-{}-{}-{}.raw",
        std::process::id(),
        core.name(),
        usec
    ));
    let pixels = match buffer.read_pixels() {
        Ok(pixels) => pixels,
        Err(e) => {
            warn!(sequence = buffer.sequence(), error = %e, "buffer not mapped, skipping dump");
            return;
        }
    };
    match write_bytes_to_file(&path, &pixels) {
        Ok(()) => debug!(sequence = buffer.sequence(), path = %path.display(), "buffer dumped"),
        Err(e) => warn!(sequence = buffer.sequence(), error = %e, "buffer dump failed"),
    }
}
