/*!
Memory-mapped firmware access through UIO devices.

`/dev/uio0` exposes the register space, a second device the DMA window
the receive bridge writes into. Both are mapped once when the controller
is opened.
*/

use std::fs::File;
use std::path::Path;
use std::ptr;

use memmap::{Mmap, MmapMut, MmapOptions};
use tracing::{debug, trace};

use super::HwController;
use crate::error::{FeError, Result};

pub const UIO_REGISTERS: &str = "/dev/uio0";
pub const UIO_DMA: &str = "/dev/uio1";

/// Size of one register in bytes
pub const SIZEOF_U32: usize = 4;

pub struct UioController {
    registers: MmapMut,
    dma: Mmap,
}

impl UioController {
    /// Map `register_bytes` of the register device and `dma_bytes` of the
    /// DMA device
    pub fn open<P: AsRef<Path>, Q: AsRef<Path>>(
        register_device: P,
        register_bytes: usize,
        dma_device: Q,
        dma_bytes: usize,
    ) -> Result<Self> {
        let registers = map_physical_mem_write(register_device.as_ref(), register_bytes)?;
        let dma = map_physical_mem_read(dma_device.as_ref(), dma_bytes)?;
        debug!(
            "Mapped {} register bytes from {:?}, {} DMA bytes from {:?}",
            register_bytes,
            register_device.as_ref(),
            dma_bytes,
            dma_device.as_ref()
        );
        Ok(Self { registers, dma })
    }

    fn register_offset(&self, addr: u32) -> Result<usize> {
        let offset = addr as usize * SIZEOF_U32;
        if offset + SIZEOF_U32 > self.registers.len() {
            return Err(FeError::register(
                addr,
                format!("outside mapped window of {} bytes", self.registers.len()),
            ));
        }
        Ok(offset)
    }
}

fn map_physical_mem_read(device: &Path, len: usize) -> Result<Mmap> {
    let file = File::open(device)?;
    // SAFETY: the device stays mapped for the lifetime of the controller and
    // is only accessed through volatile reads.
    let m = unsafe { MmapOptions::new().offset(0).len(len).map(&file)? };
    Ok(m)
}

fn map_physical_mem_write(device: &Path, len: usize) -> Result<MmapMut> {
    let file = File::options().read(true).write(true).open(device)?;
    // SAFETY: as above, all accesses are volatile and bounds checked.
    let m = unsafe { MmapOptions::new().offset(0).len(len).map_mut(&file)? };
    Ok(m)
}

impl HwController for UioController {
    fn write_single(&mut self, addr: u32, value: u32) -> Result<()> {
        let offset = self.register_offset(addr)?;
        trace!("write 0x{:05x} = 0x{:08x}", addr, value);
        let p = self.registers.as_mut_ptr() as *mut u32;
        // SAFETY: offset checked against the mapping, registers are 4-byte aligned
        unsafe {
            ptr::write_volatile(p.add(offset / SIZEOF_U32), value);
        }
        Ok(())
    }

    fn read_single(&mut self, addr: u32) -> Result<u32> {
        let offset = self.register_offset(addr)?;
        let p = self.registers.as_ptr() as *const u32;
        // SAFETY: see write_single
        let value = unsafe { ptr::read_volatile(p.add(offset / SIZEOF_U32)) };
        Ok(value)
    }

    fn read_dma(&mut self, addr: u32, buf: &mut [u32]) -> Result<()> {
        let start = addr as usize * SIZEOF_U32;
        let end = start + buf.len() * SIZEOF_U32;
        if end > self.dma.len() {
            return Err(FeError::dma_failure(
                addr,
                buf.len(),
                format!("transfer ends at byte {} beyond DMA window of {} bytes", end, self.dma.len()),
            ));
        }
        let p = self.dma.as_ptr() as *const u32;
        for (i, slot) in buf.iter_mut().enumerate() {
            // SAFETY: range checked above
            *slot = unsafe { ptr::read_volatile(p.add(start / SIZEOF_U32 + i)) };
        }
        Ok(())
    }
}
