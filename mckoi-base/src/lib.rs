mod bitmap256;
mod config;
mod error;
mod touched_range;

pub use bitmap256::{Bitmap256, DoubleBitmap256};
pub use config::{parse_byte_size, parse_duration_ms, Config};
pub use error::{err, err_kind, CommitFaultKind, Error, ErrorKind, Result};
pub use touched_range::{Overlap, TouchedRangeSummary};
