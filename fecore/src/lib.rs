/*!
# Front-End Core

Configuration, command encoding and raw data acquisition for pixel detector
readout chips (FE-I4 style parallel-register chips and Star/ABC style
serial-link chips).

## Core Types

- [`BitField`] - Register/pixel field descriptor
- [`DoubleColumnBit`] - One bit-plane of one double column
- [`PixelConfig`] - Per-pixel configuration store
- [`CommandEncoder`] - Register writes to command words (both protocols)
- [`MaskGenerator`] - Mask stage patterns for pixel scans
- [`RxCore`] - DMA based raw data acquisition
- [`ClipBoard`] - FIFO handoff between acquisition and processing threads

## Modules

- [`bitfield`] - Field descriptors and the global register file
- [`pixel`] - Double-column bit-planes and pixel addressing
- [`sixeight`] - 6b8b line code for the serial link
- [`command`] - Command word builders
- [`mask`] - Mask stage generation
- [`hw`] - Hardware register/DMA access
- [`tx`] - Command transmission
- [`rx`] - Raw data acquisition
- [`raw`] - Raw data records and the raw output stream
- [`clipboard`] - Thread-safe FIFO handoff
- [`chip`] - Chip objects composed of configuration and encoder
- [`connectivity`] - JSON blobs handed to the metadata service
- [`error`] - Common error types
*/

pub mod bitfield;
pub mod pixel;
pub mod sixeight;
pub mod command;
pub mod mask;
pub mod hw;
pub mod tx;
pub mod rx;
pub mod raw;
pub mod clipboard;
pub mod chip;
pub mod connectivity;
pub mod error;

// Re-export commonly used types
pub use bitfield::{BitField, FieldId, GlobalRegisters};
pub use pixel::{DoubleColumnBit, PixelAttribute, PixelConfig};
pub use command::{CommandEncoder, Fei4Cmd, StarCmd};
pub use mask::{MaskGenerator, MaskStage};
pub use hw::HwController;
pub use tx::TxCore;
pub use rx::{RxCore, RxState};
pub use raw::RawData;
pub use clipboard::ClipBoard;
pub use chip::Fei4;
pub use error::{FeError, Result};

/// Version information for the core library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// FE-I4 geometry constants
pub mod geometry {
    /// Pixel columns
    pub const N_COLUMNS: usize = 80;

    /// Pixel rows
    pub const N_ROWS: usize = 336;

    /// Double columns (two adjacent pixel columns share one shift register)
    pub const N_DC: usize = N_COLUMNS / 2;

    /// Pixels in one double column
    pub const PIXELS_PER_DC: usize = 2 * N_ROWS;

    /// 32-bit words holding one bit-plane of one double column
    pub const WORDS_PER_DC: usize = PIXELS_PER_DC.div_ceil(32);

    /// Pixel bit-planes (Enable, TDAC x5, LCap, SCap, HitBus, FDAC x4)
    pub const N_PLANES: usize = 13;

    /// 16-bit global registers
    pub const N_GLOBAL_REGISTERS: usize = 36;
}
