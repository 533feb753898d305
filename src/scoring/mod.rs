pub mod scorer;

pub use scorer::{compute, PostureScorer};
