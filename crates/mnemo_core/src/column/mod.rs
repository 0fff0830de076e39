//! Columnar compression of `u64` runs and datom segments.

mod packed;
mod segment;

pub use packed::{ColumnKind, ColumnStats, PackedColumn, PADDING};
pub use segment::IndexSegment;
