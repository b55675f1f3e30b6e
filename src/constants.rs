/// Default size of the VM stack in bytes. Power of two; 128 KiB.
pub const DEFAULT_STACK_SIZE: i64 = 2048 * 64;

/// Bytes pushed by a call: saved caller base pointer plus saved caller
/// program counter, four bytes each.
pub const SAVED_REGS_BYTES: i64 = 8;

/// Watermark value meaning "no step-over in effect". Any real call depth is
/// below this.
pub const OVER_DEPTH_LIMIT: i32 = (2 << 15) + 1;

/// The variable printer stops expanding arrays past this many elements.
pub const ARRAY_PRINT_LIMIT: i64 = 50;
