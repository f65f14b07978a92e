//! Record byte-layout compilation.
//!
//! Translates the per-column storage tags declared in the file header into
//! a fixed-width big-endian record layout and the frame geometry derived
//! from it.

use serde::{Deserialize, Serialize};

use crate::fp2;
use crate::frame::{FrameFooter, FrameHeader};
use crate::header::ColumnDescriptor;
use crate::{Error, Result};

/// On-disk storage type for one column.
///
/// The tag-to-width mapping is fixed and matched exhaustively; any tag
/// outside this set fails with [`Error::UnsupportedDtype`] before a single
/// frame is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageType {
    /// `IEEE4B`: big-endian IEEE 754 single precision.
    Float32Big,
    /// `IEEE8B`: big-endian IEEE 754 double precision.
    Float64Big,
    /// `FP2`: Campbell 16-bit compact float, see [`crate::fp2`].
    CompactFloat16,
}

impl StorageType {
    pub fn from_tag(tag: &str) -> Result<Self> {
        match tag {
            "IEEE4B" => Ok(StorageType::Float32Big),
            "IEEE8B" => Ok(StorageType::Float64Big),
            "FP2" => Ok(StorageType::CompactFloat16),
            other => Err(Error::UnsupportedDtype(other.to_string())),
        }
    }

    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            StorageType::Float32Big => "IEEE4B",
            StorageType::Float64Big => "IEEE8B",
            StorageType::CompactFloat16 => "FP2",
        }
    }

    /// Field width in bytes within a record.
    #[must_use]
    pub fn width(self) -> usize {
        match self {
            StorageType::Float32Big => 4,
            StorageType::Float64Big => 8,
            StorageType::CompactFloat16 => 2,
        }
    }

    /// All supported storage types decode to a numeric value. Kept as a
    /// real predicate so the schema boundary carries an explicit ignore
    /// flag for downstream normalization.
    #[must_use]
    pub fn is_numeric(self) -> bool {
        match self {
            StorageType::Float32Big | StorageType::Float64Big | StorageType::CompactFloat16 => true,
        }
    }
}

/// Compiled fixed-width record layout, in header-declared column order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordLayout {
    fields: Vec<StorageType>,
    record_size: usize,
}

impl RecordLayout {
    #[must_use]
    pub fn compile(columns: &[ColumnDescriptor]) -> Self {
        let fields: Vec<StorageType> = columns.iter().map(|c| c.storage).collect();
        let record_size = fields.iter().map(|f| f.width()).sum();
        RecordLayout {
            fields,
            record_size,
        }
    }

    #[must_use]
    pub fn fields(&self) -> &[StorageType] {
        &self.fields
    }

    /// Record width in bytes.
    #[must_use]
    pub fn record_size(&self) -> usize {
        self.record_size
    }

    /// Number of whole records that fit in one frame body.
    ///
    /// # Errors
    /// [`Error::FrameGeometry`] if the geometry implies fewer than one
    /// record per frame.
    pub fn records_per_frame(&self, frame_size: usize) -> Result<usize> {
        let overhead = FrameHeader::LEN + FrameFooter::LEN;
        if self.record_size == 0 || frame_size < overhead + self.record_size {
            return Err(Error::FrameGeometry {
                frame_size,
                record_size: self.record_size,
            });
        }
        Ok((frame_size - overhead) / self.record_size)
    }

    /// Decode one record from `buf`, or `None` if there are not enough
    /// bytes. Fields are big-endian; `CompactFloat16` fields pass through
    /// the FP2 decoder, all others decode at their native width.
    #[must_use]
    pub fn decode_record(&self, buf: &[u8]) -> Option<Vec<f64>> {
        if buf.len() < self.record_size {
            return None;
        }
        let mut values = Vec::with_capacity(self.fields.len());
        let mut at = 0;
        for field in &self.fields {
            let end = at + field.width();
            let raw = &buf[at..end];
            let value = match field {
                StorageType::Float32Big => {
                    f64::from(f32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
                }
                StorageType::Float64Big => f64::from_be_bytes([
                    raw[0], raw[1], raw[2], raw[3], raw[4], raw[5], raw[6], raw[7],
                ]),
                StorageType::CompactFloat16 => fp2::decode(u16::from_be_bytes([raw[0], raw[1]])),
            };
            values.push(value);
            at = end;
        }
        Some(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(tags: &[&str]) -> Vec<ColumnDescriptor> {
        tags.iter()
            .enumerate()
            .map(|(i, tag)| ColumnDescriptor {
                name: format!("col{i}"),
                unit: String::new(),
                aggregation: String::new(),
                storage: StorageType::from_tag(tag).unwrap(),
                ignore: false,
            })
            .collect()
    }

    #[test]
    fn widths_follow_declared_order() {
        let layout = RecordLayout::compile(&columns(&["IEEE4B", "FP2", "IEEE8B"]));
        assert_eq!(
            layout.fields(),
            &[
                StorageType::Float32Big,
                StorageType::CompactFloat16,
                StorageType::Float64Big
            ]
        );
        assert_eq!(layout.record_size(), 14);
    }

    #[test]
    fn unknown_tag_is_unsupported() {
        let err = StorageType::from_tag("ASCII(12)").unwrap_err();
        assert!(matches!(err, Error::UnsupportedDtype(tag) if tag == "ASCII(12)"));
    }

    #[test]
    fn records_per_frame_is_floored() {
        let layout = RecordLayout::compile(&columns(&["IEEE4B", "FP2"]));
        // (64 - 16) / 6 = 8
        assert_eq!(layout.records_per_frame(64).unwrap(), 8);
        // (63 - 16) / 6 = 7 with remainder
        assert_eq!(layout.records_per_frame(63).unwrap(), 7);
    }

    #[test]
    fn non_positive_record_count_is_rejected() {
        let layout = RecordLayout::compile(&columns(&["IEEE8B"]));
        // 16 bytes of overhead plus an 8-byte record does not fit in 20.
        let err = layout.records_per_frame(20).unwrap_err();
        assert!(matches!(err, Error::FrameGeometry { .. }));
    }

    #[test]
    fn decode_record_mixed_fields() {
        let layout = RecordLayout::compile(&columns(&["IEEE4B", "FP2", "IEEE8B"]));
        let mut buf = Vec::new();
        buf.extend_from_slice(&2.5f32.to_be_bytes());
        buf.extend_from_slice(&0x4001u16.to_be_bytes()); // fp2: 0.01
        buf.extend_from_slice(&(-7.25f64).to_be_bytes());
        let values = layout.decode_record(&buf).unwrap();
        assert_eq!(values, vec![2.5, 0.01, -7.25]);
    }

    #[test]
    fn decode_record_short_buffer_is_none() {
        let layout = RecordLayout::compile(&columns(&["IEEE8B"]));
        assert!(layout.decode_record(&[0u8; 7]).is_none());
    }
}
