pub mod error;
pub mod history;
pub mod mask;
pub mod matching;

pub use error::{Error, Result};
pub use history::{RunLog, RunRecord, TrendSummary, SCHEMA_VERSION};
pub use mask::{Mask, Region};
pub use matching::{agreement, iou, match_and_combine, MatchOutcome, RegionMatch};
