#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The first preamble token is not a supported file type tag.
    #[error("unsupported file type tag: {0:?}")]
    HeaderMismatch(String),

    /// A column declared a dtype tag outside the known set.
    #[error("unsupported column dtype tag: {0:?}")]
    UnsupportedDtype(String),

    /// An interval string such as `"100 Msec"` could not be parsed.
    #[error("unparseable interval: {0:?}")]
    Frequency(String),

    /// Header geometry does not leave room for at least one record per frame.
    #[error("frame geometry does not fit: frame_size={frame_size} record_size={record_size}")]
    FrameGeometry {
        frame_size: usize,
        record_size: usize,
    },

    /// A preamble line is missing or has too few fields.
    #[error("malformed preamble: {0}")]
    Preamble(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
