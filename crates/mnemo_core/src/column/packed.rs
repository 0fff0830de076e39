//! Bit-packed `u64` columns.
//!
//! Values are read as an 8-bit partition (top byte) plus a 56-bit payload.
//! A column stores the minimum partition and payload once and then, per
//! value, only the offsets from those minimums packed into the fewest whole
//! bytes that hold them:
//!
//! ```text
//! entry = ((payload - min_payload) << partition_bits) | (partition - min_partition)
//! ```
//!
//! Entries are little-endian and `bytes_per_entry` wide. Readers load a full
//! 8-byte word and mask it, so the entry buffer always carries
//! [`PADDING`] trailing bytes.

use crate::error::{CoreError, CoreResult};
use crate::types::PAYLOAD_MASK;

/// Trailing bytes after the last packed entry.
pub const PADDING: usize = 8;

const PARTITION_SHIFT: u32 = 56;

/// Which encoding a column uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ColumnKind {
    /// Every value identical.
    Constant = 0,
    /// Raw 8-byte values.
    Unpacked = 1,
    /// Offset entries of fewer than 8 bytes.
    Packed = 2,
}

impl ColumnKind {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Constant),
            1 => Some(Self::Unpacked),
            2 => Some(Self::Packed),
            _ => None,
        }
    }
}

/// Number of bits needed to hold every value in `0..=delta`.
fn bits_for(delta: u64) -> u32 {
    u64::BITS - delta.leading_zeros()
}

/// A mask of the low `bits` bits.
fn low_mask(bits: u32) -> u64 {
    u64::MAX.checked_shr(u64::BITS.saturating_sub(bits)).unwrap_or(0)
}

/// Rebuilds a value from a packed entry; `None` when the offsets overflow
/// the partition byte or the 56-bit payload.
fn unpack_entry(entry: u64, value_offset: u64, partition_offset: u8, partition_bits: u8) -> Option<u64> {
    let bits = u32::from(partition_bits);
    let payload = entry
        .checked_shr(bits)
        .unwrap_or(0)
        .checked_add(value_offset)
        .filter(|p| *p <= PAYLOAD_MASK)?;
    let partition = u8::try_from(entry & low_mask(bits))
        .ok()?
        .checked_add(partition_offset)?;
    Some((u64::from(partition) << PARTITION_SHIFT) | payload)
}

/// Ranges of a slice of values, computed in one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnStats {
    /// Number of values.
    pub count: usize,
    /// Smallest payload.
    pub min_payload: u64,
    /// Largest payload.
    pub max_payload: u64,
    /// Smallest partition byte.
    pub min_partition: u8,
    /// Largest partition byte.
    pub max_partition: u8,
}

impl ColumnStats {
    /// Scans `values` once.
    #[must_use]
    pub fn analyze(values: &[u64]) -> Self {
        let mut stats = Self {
            count: values.len(),
            min_payload: u64::MAX,
            max_payload: 0,
            min_partition: u8::MAX,
            max_partition: 0,
        };
        for &v in values {
            let payload = v & PAYLOAD_MASK;
            let partition = (v >> PARTITION_SHIFT) as u8;
            stats.min_payload = stats.min_payload.min(payload);
            stats.max_payload = stats.max_payload.max(payload);
            stats.min_partition = stats.min_partition.min(partition);
            stats.max_partition = stats.max_partition.max(partition);
        }
        if values.is_empty() {
            stats.min_payload = 0;
            stats.min_partition = 0;
        }
        stats
    }

    /// Bits needed for partition offsets.
    #[must_use]
    pub fn partition_bits(&self) -> u32 {
        bits_for(u64::from(self.max_partition - self.min_partition))
    }

    /// Bits needed for payload offsets.
    #[must_use]
    pub fn payload_bits(&self) -> u32 {
        bits_for(self.max_payload - self.min_payload)
    }

    /// Whole bytes needed per packed entry.
    #[must_use]
    pub fn total_bytes(&self) -> u32 {
        (self.partition_bits() + self.payload_bits()).div_ceil(8)
    }

    /// Encoding chosen for these ranges.
    #[must_use]
    pub fn kind(&self) -> ColumnKind {
        match self.total_bytes() {
            0 => ColumnKind::Constant,
            n if n >= 8 => ColumnKind::Unpacked,
            _ => ColumnKind::Packed,
        }
    }
}

/// A read-only compressed column of `u64` values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackedColumn {
    /// `count` copies of `value`.
    Constant {
        /// The repeated value.
        value: u64,
        /// Number of values.
        count: usize,
    },
    /// Raw values.
    Unpacked(Vec<u64>),
    /// Offset-encoded values.
    Packed {
        /// Subtracted from every payload.
        value_offset: u64,
        /// Subtracted from every partition.
        partition_offset: u8,
        /// Low bits of an entry that hold the partition offset.
        partition_bits: u8,
        /// Width of one entry.
        bytes_per_entry: u8,
        /// Number of values.
        count: usize,
        /// `count * bytes_per_entry` entry bytes plus [`PADDING`].
        data: Vec<u8>,
    },
}

impl PackedColumn {
    /// Compresses `values`, choosing the smallest encoding.
    #[must_use]
    pub fn pack(values: &[u64]) -> Self {
        let stats = ColumnStats::analyze(values);
        match stats.kind() {
            ColumnKind::Constant => Self::Constant {
                value: values.first().copied().unwrap_or(0),
                count: values.len(),
            },
            ColumnKind::Unpacked => Self::Unpacked(values.to_vec()),
            ColumnKind::Packed => {
                let partition_bits = stats.partition_bits();
                let width = stats.total_bytes() as usize;
                let mut data = vec![0u8; values.len() * width + PADDING];
                for (i, &v) in values.iter().enumerate() {
                    let payload = (v & PAYLOAD_MASK) - stats.min_payload;
                    let partition = u64::from((v >> PARTITION_SHIFT) as u8 - stats.min_partition);
                    let entry = (payload << partition_bits) | partition;
                    data[i * width..(i + 1) * width].copy_from_slice(&entry.to_le_bytes()[..width]);
                }
                Self::Packed {
                    value_offset: stats.min_payload,
                    partition_offset: stats.min_partition,
                    partition_bits: partition_bits as u8,
                    bytes_per_entry: width as u8,
                    count: values.len(),
                    data,
                }
            }
        }
    }

    /// Returns the encoding in use.
    #[must_use]
    pub fn kind(&self) -> ColumnKind {
        match self {
            Self::Constant { .. } => ColumnKind::Constant,
            Self::Unpacked(_) => ColumnKind::Unpacked,
            Self::Packed { .. } => ColumnKind::Packed,
        }
    }

    /// Number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Constant { count, .. } | Self::Packed { count, .. } => *count,
            Self::Unpacked(values) => values.len(),
        }
    }

    /// True when the column holds no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the value at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<u64> {
        if index >= self.len() {
            return None;
        }
        match self {
            Self::Constant { value, .. } => Some(*value),
            Self::Unpacked(values) => values.get(index).copied(),
            Self::Packed {
                value_offset,
                partition_offset,
                partition_bits,
                bytes_per_entry,
                data,
                ..
            } => {
                let start = index.checked_mul(usize::from(*bytes_per_entry))?;
                let word: [u8; 8] = data.get(start..start.checked_add(8)?)?.try_into().ok()?;
                let entry = u64::from_le_bytes(word) & low_mask(u32::from(*bytes_per_entry) * 8);
                unpack_entry(entry, *value_offset, *partition_offset, *partition_bits)
            }
        }
    }

    /// Iterates over every value.
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.len()).filter_map(move |i| self.get(i))
    }

    /// Decompresses every value.
    #[must_use]
    pub fn unpack(&self) -> Vec<u64> {
        self.iter().collect()
    }

    /// Bytes of the serialized form.
    #[must_use]
    pub fn size_in_bytes(&self) -> usize {
        const HEADER: usize = 1 + 4;
        HEADER
            + match self {
                Self::Constant { .. } => 8,
                Self::Unpacked(values) => values.len() * 8,
                Self::Packed { data, .. } => 8 + 3 + data.len(),
            }
    }

    /// Serializes the column.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidValue`] when the column holds more than
    /// `u32::MAX` values.
    ///
    /// Layout: `kind:u8 | count:u32` then, per kind, `value:u64` (Constant),
    /// `count` raw `u64`s (Unpacked), or
    /// `valueOffset:u64 | partitionOffset:u8 | bytesPerEntry:u8 |
    /// partitionBits:u8` followed by the entries and padding (Packed).
    /// Integers are little-endian.
    pub fn to_bytes(&self) -> CoreResult<Vec<u8>> {
        let count = u32::try_from(self.len()).map_err(|_| {
            CoreError::invalid_value(format!("packed column of {} values is too long", self.len()))
        })?;
        let mut buf = Vec::with_capacity(self.size_in_bytes());
        buf.push(self.kind() as u8);
        buf.extend_from_slice(&count.to_le_bytes());
        match self {
            Self::Constant { value, .. } => buf.extend_from_slice(&value.to_le_bytes()),
            Self::Unpacked(values) => {
                for v in values {
                    buf.extend_from_slice(&v.to_le_bytes());
                }
            }
            Self::Packed {
                value_offset,
                partition_offset,
                partition_bits,
                bytes_per_entry,
                data,
                ..
            } => {
                buf.extend_from_slice(&value_offset.to_le_bytes());
                buf.push(*partition_offset);
                buf.push(*bytes_per_entry);
                buf.push(*partition_bits);
                buf.extend_from_slice(data);
            }
        }
        Ok(buf)
    }

    /// Parses a column written by [`PackedColumn::to_bytes`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidValue`] for unknown kinds, truncated
    /// buffers, inconsistent widths, offsets that overflow a value, or
    /// trailing bytes.
    pub fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        let corrupt = |what: &str| CoreError::invalid_value(format!("packed column: {what}"));

        let mut cursor = 0usize;
        let mut take = |n: usize| -> CoreResult<&[u8]> {
            let slice = bytes
                .get(cursor..cursor + n)
                .ok_or_else(|| corrupt("unexpected end of buffer"))?;
            cursor += n;
            Ok(slice)
        };
        let read_u64 = |b: &[u8]| {
            let mut word = [0u8; 8];
            word.copy_from_slice(b);
            u64::from_le_bytes(word)
        };

        let kind = ColumnKind::from_byte(take(1)?[0]).ok_or_else(|| corrupt("unknown kind"))?;
        let count_bytes = take(4)?;
        let count = u32::from_le_bytes([count_bytes[0], count_bytes[1], count_bytes[2], count_bytes[3]])
            as usize;

        let column = match kind {
            ColumnKind::Constant => Self::Constant {
                value: read_u64(take(8)?),
                count,
            },
            ColumnKind::Unpacked => {
                let raw = take(count.checked_mul(8).ok_or_else(|| corrupt("count overflow"))?)?;
                Self::Unpacked(raw.chunks_exact(8).map(read_u64).collect())
            }
            ColumnKind::Packed => {
                let value_offset = read_u64(take(8)?);
                let header = take(3)?;
                let (partition_offset, bytes_per_entry, partition_bits) =
                    (header[0], header[1], header[2]);
                if bytes_per_entry == 0
                    || bytes_per_entry >= 8
                    || partition_bits > 8
                    || u32::from(partition_bits) > u32::from(bytes_per_entry) * 8
                {
                    return Err(corrupt("invalid entry width"));
                }
                if value_offset > PAYLOAD_MASK {
                    return Err(corrupt("value offset exceeds payload range"));
                }
                let len = count
                    .checked_mul(usize::from(bytes_per_entry))
                    .and_then(|n| n.checked_add(PADDING))
                    .ok_or_else(|| corrupt("count overflow"))?;
                let data = take(len)?.to_vec();
                let width = usize::from(bytes_per_entry);
                let entry_mask = low_mask(u32::from(bytes_per_entry) * 8);
                for chunk in data.chunks_exact(width).take(count) {
                    let mut word = [0u8; 8];
                    word[..width].copy_from_slice(chunk);
                    let entry = u64::from_le_bytes(word) & entry_mask;
                    if unpack_entry(entry, value_offset, partition_offset, partition_bits).is_none() {
                        return Err(corrupt("entry overflows its offsets"));
                    }
                }
                Self::Packed {
                    value_offset,
                    partition_offset,
                    partition_bits,
                    bytes_per_entry,
                    count,
                    data,
                }
            }
        };

        if cursor != bytes.len() {
            return Err(corrupt("trailing bytes"));
        }
        Ok(column)
    }
}
