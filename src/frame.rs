//! TOB3 frame structures.
//!
//! A frame is a fixed-size block of `[12-byte header][body][4-byte footer]`
//! where the body holds a whole number of fixed-width records. All fields
//! are big-endian.

use serde::{Deserialize, Serialize};

/// Seconds between the Campbell reference epoch (1990-01-01T00:00:00) and
/// the Unix epoch.
pub const CAMPBELL_EPOCH_OFFSET_SECS: u32 = 631_152_000;

/// Frame header: the base-timestamp components and the logger's record
/// counter for the first record in the frame.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy)]
pub struct FrameHeader {
    /// Whole seconds since the Campbell epoch.
    pub seconds: u32,
    /// Sub-second tick counter, scaled by the header-declared frame time.
    pub ticks: u32,
    /// Beginning record number, assigned by the logger.
    pub record_number: u32,
}

impl FrameHeader {
    /// Frame header length in bytes.
    pub const LEN: usize = 12;

    /// Construct from the provided bytes, or `None` if there are not
    /// enough bytes.
    #[must_use]
    pub fn decode(dat: &[u8]) -> Option<Self> {
        if dat.len() < Self::LEN {
            return None;
        }
        Some(FrameHeader {
            seconds: u32::from_be_bytes([dat[0], dat[1], dat[2], dat[3]]),
            ticks: u32::from_be_bytes([dat[4], dat[5], dat[6], dat[7]]),
            record_number: u32::from_be_bytes([dat[8], dat[9], dat[10], dat[11]]),
        })
    }

    /// Base timestamp of the frame's first record, in Unix seconds.
    ///
    /// `frame_time` is the duration of one tick in seconds, from the file
    /// header's frame time resolution field.
    #[must_use]
    pub fn base_timestamp(&self, frame_time: f64) -> f64 {
        f64::from(self.seconds)
            + f64::from(self.ticks) * frame_time
            + f64::from(CAMPBELL_EPOCH_OFFSET_SECS)
    }
}

/// Frame footer bit fields, decomposed from one big-endian u32.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy)]
pub struct FrameFooter {
    /// Bits 0-10: byte offset of valid data for a minor frame that did not
    /// fill its nominal size. Zero for a full frame.
    pub offset: u16,
    /// Bit 14: frame holds no records.
    pub empty: bool,
    /// Bit 15: frame was marked removed by the logger.
    pub removed: bool,
    /// Bits 16-31: validation stamp, must match the header-declared value.
    pub validation: u16,
}

impl FrameFooter {
    /// Frame footer length in bytes.
    pub const LEN: usize = 4;

    /// Construct from the provided bytes, or `None` if there are not
    /// enough bytes.
    #[must_use]
    pub fn decode(dat: &[u8]) -> Option<Self> {
        if dat.len() < Self::LEN {
            return None;
        }
        let x = u32::from_be_bytes([dat[0], dat[1], dat[2], dat[3]]);
        Some(FrameFooter {
            offset: (x & 0x7ff) as u16,
            empty: (x >> 14) & 0x1 == 1,
            removed: (x >> 15) & 0x1 == 1,
            validation: (x >> 16) as u16,
        })
    }

    /// Encode back to the wire representation. Used to build frames for
    /// writing fixtures and round-trip checks.
    #[must_use]
    pub fn encode(&self) -> [u8; Self::LEN] {
        let x = (u32::from(self.validation) << 16)
            | (u32::from(self.removed) << 15)
            | (u32::from(self.empty) << 14)
            | u32::from(self.offset & 0x7ff);
        x.to_be_bytes()
    }
}

/// One frame-sized block read from the stream.
///
/// The final frame of a file may be shorter than the nominal frame size,
/// in which case the footer is taken from the end of whatever bytes were
/// read and the body shrinks accordingly.
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: FrameHeader,
    pub footer: FrameFooter,
    /// All frame bytes, including header and footer.
    pub data: Vec<u8>,
}

impl Frame {
    /// Decode `dat` into a `Frame`, or `None` if not enough bytes for a
    /// header and a footer.
    #[must_use]
    pub fn decode(dat: Vec<u8>) -> Option<Self> {
        if dat.len() < FrameHeader::LEN + FrameFooter::LEN {
            return None;
        }
        let header = FrameHeader::decode(&dat)?;
        let footer = FrameFooter::decode(&dat[dat.len() - FrameFooter::LEN..])?;
        Some(Frame {
            header,
            footer,
            data: dat,
        })
    }

    /// The record bytes between header and footer.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.data[FrameHeader::LEN..self.data.len() - FrameFooter::LEN]
    }
}
