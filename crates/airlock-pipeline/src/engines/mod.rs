//! Format engines behind [`crate::Pipeline`].

pub mod document;
pub mod raster;
pub mod reencode;
pub mod tabular;

pub use document::PdfPipeline;
pub use raster::ImagePipeline;
pub use tabular::{BusinessRule, CellPredicate, CsvPipeline};
