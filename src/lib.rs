#![doc = include_str!("../README.md")]

mod error;

pub mod decoder;
pub mod fp2;
pub mod frame;
pub mod header;
pub mod layout;
pub mod schema;
pub mod table;

pub use decoder::{
    decode_file, decode_stream, read_frames, DecodeOptions, DecodedFile, DecodedFrame, FrameIter,
    StopReason,
};
pub use error::{Error, Result};
pub use frame::{Frame, FrameFooter, FrameHeader, CAMPBELL_EPOCH_OFFSET_SECS};
pub use header::{ColumnDescriptor, FileHeader, FileType};
pub use layout::{RecordLayout, StorageType};
pub use schema::{merge_metadata, MergePolicy, MetaValue, Metadata};
pub use table::{summarize, Aggregate, Table};
