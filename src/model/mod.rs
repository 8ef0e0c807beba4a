//! Model module: the CNN architecture behind the frozen classifier weights
//!
//! Weights are produced offline and shipped as a burn `CompactRecorder`
//! record; this module only defines the module skeleton they load into.

pub mod cnn;

pub use cnn::{LeafClassifier, LeafClassifierConfig};

/// Default dropout rate of the trained head
pub const DEFAULT_DROPOUT: f64 = 0.3;

/// Default base filter count of the trained network
pub const DEFAULT_BASE_FILTERS: usize = 32;
