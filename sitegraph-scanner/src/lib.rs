pub mod boundary;
pub mod crawler;
pub mod error;
pub mod normalize;
pub mod result;

pub use boundary::{Boundary, in_scope};
pub use crawler::{Crawler, ProgressCallback};
pub use error::ScanError;
pub use normalize::PageContext;
pub use result::CrawledNode;
