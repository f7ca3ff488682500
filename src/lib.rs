pub mod census;
pub mod config;
pub mod error;
pub mod model;
pub mod percentile;
pub mod transform;
pub mod weights;
pub mod writer;

pub use census::CensusIncomeTable;
pub use config::ReweightConfig;
pub use error::{ReweightError, Result};
pub use model::{BracketSet, Region, RegionTable, WeightMatrix};
pub use percentile::PercentileCurve;
pub use transform::apply_weights;
pub use weights::{compute_weights, overlap_fraction, BinReweighter, TargetBracket, WeightResult};
pub use writer::CsvWriter;
