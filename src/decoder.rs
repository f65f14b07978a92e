//! TOB3 frame stream decoding.
//!
//! Frames are read sequentially at the fixed frame size declared by the
//! header. Raw blocks are prefetched on a background reader thread while
//! the current frame is decoded; this pipelining never changes the
//! accept/reject outcome. Decoding stops at the first rejected frame,
//! matching logger behavior where everything after the write pointer is
//! stale or removed data.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{bounded, Receiver};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use typed_builder::TypedBuilder;

use crate::frame::Frame;
use crate::header::FileHeader;
use crate::schema::{merge_metadata, MergePolicy, Metadata};
use crate::table::{summarize, Aggregate, Assembler, Table};
use crate::{Error, Result};

/// Why the frame loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// Clean end of file at a frame boundary.
    EndOfStream,
    /// A short final read without enough bytes to validate.
    Truncated,
    /// Footer validation stamp did not match the header's.
    StampMismatch,
    /// Footer empty flag was set.
    EmptyFrame,
    /// Footer removed flag was set.
    RemovedFrame,
}

/// An accepted [`Frame`] along with its decoded base timestamp and the
/// number of records that are valid in its body.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub frame: Frame,
    /// Base timestamp of the first record, Unix seconds.
    pub base: f64,
    /// Count of valid leading records; trailing records beyond this are
    /// dropped, not zero-filled.
    pub valid_records: usize,
}

const READ_AHEAD_BLOCKS: usize = 64;

/// Returns an iterator over the accepted frames of `reader`.
///
/// The iterator yields frames until end of stream or until the first
/// frame fails footer validation, whichever comes first. The terminal
/// state is available from [`FrameIter::stopped`] afterwards; I/O errors
/// surface as `Err` items.
pub fn read_frames<R>(reader: R, header: &FileHeader) -> FrameIter
where
    R: Read + Send + 'static,
{
    let frame_size = header.frame_size;
    let (blocks_tx, blocks_rx) = bounded(READ_AHEAD_BLOCKS);

    let handle = thread::Builder::new()
        .name("tob3_frame_reader".into())
        .spawn(move || {
            let mut reader = reader;
            loop {
                let mut block = vec![0u8; frame_size];
                let n = match read_block(&mut reader, &mut block) {
                    Ok(n) => n,
                    Err(err) => {
                        let _ = blocks_tx.send(Err(Error::Io(err)));
                        return;
                    }
                };
                if n == 0 {
                    return;
                }
                block.truncate(n);
                if blocks_tx.send(Ok(block)).is_err() {
                    trace!("block receiver dropped, stopping read-ahead");
                    return;
                }
            }
        })
        .expect("failed to spawn frame reader thread");

    FrameIter {
        blocks: Some(blocks_rx),
        handle: Some(handle),
        frame_size,
        record_size: header.record_size,
        records_per_frame: header.records_per_frame,
        frame_time: header.frame_time,
        validation_stamp: header.validation_stamp,
        accepted: 0,
        stopped: None,
    }
}

/// Fill `buf` from `r`, returning the number of bytes read. A short count
/// means end of stream was reached mid-frame.
fn read_block<R: Read>(r: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut n = 0;
    while n < buf.len() {
        match r.read(&mut buf[n..]) {
            Ok(0) => break,
            Ok(m) => n += m,
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(n)
}

/// Provides accepted frames read by [`read_frames`].
pub struct FrameIter {
    blocks: Option<Receiver<Result<Vec<u8>>>>,
    handle: Option<JoinHandle<()>>,
    frame_size: usize,
    record_size: usize,
    records_per_frame: usize,
    frame_time: f64,
    validation_stamp: u16,
    accepted: usize,
    stopped: Option<StopReason>,
}

impl FrameIter {
    /// Number of frames accepted so far.
    #[must_use]
    pub fn accepted(&self) -> usize {
        self.accepted
    }

    /// The terminal state, once the iterator has returned `None`.
    #[must_use]
    pub fn stopped(&self) -> Option<StopReason> {
        self.stopped
    }

    fn finish(&mut self, reason: StopReason) {
        self.stopped = Some(reason);
        // Dropping the receiver unblocks the reader thread if it is
        // parked on a full channel.
        self.blocks.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    fn validate(&self, frame: &Frame) -> Option<StopReason> {
        if frame.footer.validation != self.validation_stamp {
            Some(StopReason::StampMismatch)
        } else if frame.footer.empty {
            Some(StopReason::EmptyFrame)
        } else if frame.footer.removed {
            Some(StopReason::RemovedFrame)
        } else {
            None
        }
    }
}

impl Iterator for FrameIter {
    type Item = Result<DecodedFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        let blocks = self.blocks.as_ref()?;
        let block = match blocks.recv() {
            // Channel closed: reader thread saw a clean EOF.
            Err(_) => {
                self.finish(StopReason::EndOfStream);
                return None;
            }
            Ok(Err(err)) => {
                self.finish(StopReason::EndOfStream);
                return Some(Err(err));
            }
            Ok(Ok(block)) => block,
        };

        if block.len() < self.frame_size {
            trace!(
                got = block.len(),
                want = self.frame_size,
                "truncated final frame"
            );
        }
        let Some(frame) = Frame::decode(block) else {
            // Not even header + footer bytes left; discard the partial.
            self.finish(StopReason::Truncated);
            return None;
        };
        if let Some(reason) = self.validate(&frame) {
            debug!(
                accepted = self.accepted,
                reason = ?reason,
                got = frame.footer.validation,
                want = self.validation_stamp,
                "frame rejected, stopping"
            );
            self.finish(reason);
            return None;
        }

        // A truncated final frame, or a footer offset on a minor frame
        // that did not fill, bounds the valid record count.
        let mut valid = self.records_per_frame.min(frame.body().len() / self.record_size);
        if frame.footer.offset > 0 {
            valid = valid.min(frame.footer.offset as usize / self.record_size);
        }
        let base = frame.header.base_timestamp(self.frame_time);
        self.accepted += 1;
        trace!(base, valid, record_number = frame.header.record_number, "accepted frame");

        Some(Ok(DecodedFrame {
            frame,
            base,
            valid_records: valid,
        }))
    }
}

/// Options controlling table assembly.
#[derive(Debug, Clone, Default, TypedBuilder)]
pub struct DecodeOptions {
    /// When non-empty, collapse the table to a single summary row holding
    /// these aggregates per column.
    #[builder(default)]
    pub aggregates: Vec<Aggregate>,
    /// Truncate the assembled table to its first `n` rows. Only needed
    /// for small tables that never fill a frame.
    #[builder(default)]
    pub clip: Option<usize>,
    /// Caller-supplied column metadata, folded into the parsed schema.
    #[builder(default)]
    pub metadata: BTreeMap<String, Metadata>,
    /// Collision policy for the metadata fold.
    #[builder(default)]
    pub merge_policy: MergePolicy,
}

/// A fully decoded file: header, assembled table, and the schema handed
/// to downstream normalization.
#[derive(Debug)]
pub struct DecodedFile {
    pub header: FileHeader,
    pub table: Table,
    /// Per-column metadata keyed by original name, caller overrides
    /// applied.
    pub variable_map: BTreeMap<String, Metadata>,
    /// Count of frames accepted before the loop stopped.
    pub frames: usize,
    pub stopped: StopReason,
}

/// Decode a TOB3 file from `path`.
///
/// # Errors
/// Fatal conditions only: a bad or unsupported header, or an I/O error.
/// Footer rejection and truncation are not errors; the table assembled up
/// to that point is returned along with the stop reason.
pub fn decode_file<P: AsRef<Path>>(path: P, opts: &DecodeOptions) -> Result<DecodedFile> {
    decode_stream(File::open(path)?, opts)
}

/// Decode a TOB3 byte stream. See [`decode_file`].
pub fn decode_stream<R>(reader: R, opts: &DecodeOptions) -> Result<DecodedFile>
where
    R: Read + Send + 'static,
{
    let mut reader = BufReader::new(reader);
    let header = FileHeader::read(&mut reader)?;

    let mut assembler = Assembler::new(&header);
    let mut frames = read_frames(reader, &header);
    for zult in frames.by_ref() {
        assembler.push_frame(&zult?);
    }
    let stopped = frames.stopped().unwrap_or(StopReason::EndOfStream);
    debug!(frames = frames.accepted(), stopped = ?stopped, "frame read complete");

    let mut table = assembler.finish(opts.clip);
    if !opts.aggregates.is_empty() {
        table = summarize(&table, &opts.aggregates);
    }

    let mut variable_map = header.variable_map();
    for (column, meta) in &opts.metadata {
        match variable_map.get_mut(column) {
            Some(base) => merge_metadata(base, meta.clone(), opts.merge_policy),
            None => {
                variable_map.insert(column.clone(), meta.clone());
            }
        }
    }

    Ok(DecodedFile {
        frames: frames.accepted(),
        stopped,
        header,
        table,
        variable_map,
    })
}
