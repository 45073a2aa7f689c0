//! Feed handler - binary command stream in, per-symbol queues out.
//!
//! The input file is a run of fixed-size [`OrderCommand`] records. It is
//! mapped read-only, advised for sequential access, and dispatched by
//! `symbol_id` into the matching threads' command queues. Records with
//! an unknown symbol are dropped; a full queue is waited out with
//! pause-then-yield, never dropped.

use std::fs::File;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::{info, warn};
use zerocopy::FromBytes;

use crate::command::OrderCommand;
use crate::spsc::{Backoff, SpscQueue};

/// Read-only memory mapping of a whole file.
pub struct MappedFile {
    ptr: *mut libc::c_void,
    len: usize,
}

// The mapping is immutable for its lifetime.
unsafe impl Send for MappedFile {}

impl MappedFile {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
        let len = file
            .metadata()
            .with_context(|| format!("stat {}", path.display()))?
            .len() as usize;
        if len == 0 {
            return Ok(Self {
                ptr: std::ptr::null_mut(),
                len: 0,
            });
        }

        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ,
                libc::MAP_PRIVATE,
                file.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            bail!(
                "mmap {} failed: {}",
                path.display(),
                std::io::Error::last_os_error()
            );
        }
        #[cfg(target_os = "linux")]
        unsafe {
            libc::madvise(ptr, len, libc::MADV_SEQUENTIAL);
        }

        Ok(Self { ptr, len })
    }

    pub fn bytes(&self) -> &[u8] {
        if self.len == 0 {
            &[]
        } else {
            unsafe { std::slice::from_raw_parts(self.ptr.cast::<u8>(), self.len) }
        }
    }
}

impl Drop for MappedFile {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe {
                libc::munmap(self.ptr, self.len);
            }
        }
    }
}

/// Reads the command file and fans records out by symbol.
pub struct FeedHandler {
    input: PathBuf,
    queues: Vec<Arc<SpscQueue<OrderCommand>>>,
    spin_loops_per_yield: u32,
}

impl FeedHandler {
    pub fn new(
        input: PathBuf,
        queues: Vec<Arc<SpscQueue<OrderCommand>>>,
        spin_loops_per_yield: u32,
    ) -> Self {
        Self {
            input,
            queues,
            spin_loops_per_yield,
        }
    }

    /// Dispatch the whole file. Returns the number of commands enqueued.
    pub fn run(&self) -> Result<u64> {
        let map = MappedFile::open(&self.input)?;
        let bytes = map.bytes();
        let rec = std::mem::size_of::<OrderCommand>();
        let num_records = bytes.len() / rec;
        if bytes.len() % rec != 0 {
            warn!(
                "feed: {} trailing bytes ignored (not a whole record)",
                bytes.len() % rec
            );
        }
        info!(
            "feed: {} bytes mapped, {} records",
            bytes.len(),
            num_records
        );

        let mut dispatched = 0u64;
        for i in 0..num_records {
            let Some(cmd) = OrderCommand::read_from(&bytes[i * rec..(i + 1) * rec]) else {
                continue;
            };
            let symbol = cmd.symbol_id as usize;
            let Some(queue) = self.queues.get(symbol) else {
                // Unknown symbol: malformed input, dropped here.
                continue;
            };

            let mut backoff = Backoff::new(self.spin_loops_per_yield);
            while !queue.push(cmd) {
                backoff.snooze();
            }

            dispatched += 1;
            if dispatched % 1_000_000 == 0 {
                info!("feed: dispatched {dispatched} commands");
            }
        }

        info!("feed: finished, {dispatched} commands dispatched");
        Ok(dispatched)
    }
}
