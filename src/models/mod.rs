pub mod finding;
pub mod posture;
pub mod scan;

pub use finding::*;
pub use posture::*;
pub use scan::*;
