use thiserror::Error;

/// Rank/dim mismatches, bad reshape targets, bad axes. Fatal to the
/// current graph compile or op init -- surfaced straight to the caller.
#[derive(Debug, Error)]
pub enum ShapeError {
    #[error("couldn't reshape from {from} to {to}")]
    Reshape { from: String, to: String },
    #[error("axis {axis} out of range for rank {rank}")]
    BadAxis { axis: i64, rank: usize },
    #[error("rank {rank} exceeds SHAPE_MAX_RANK")]
    RankOverflow { rank: usize },
}

/// Stream version too new, or the buffer is truncated/corrupt. The stream
/// itself becomes unusable past this point; callers propagate the error.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum SerializationError {
    #[error("unexpected end of stream")]
    Truncated,
    #[error("corrupt stream: {0}")]
    Corrupt(&'static str),
    #[error("unsupported version {found}, expected <= {max_supported}")]
    VersionTooNew { found: u32, max_supported: u32 },
    #[error("i/o error: {0}")]
    Io(String),
}
