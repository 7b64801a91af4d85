pub mod error;
pub mod grounder;
pub mod reader;
pub mod section;

pub use error::GroundingError;
pub use grounder::{Grounder, GrounderConfig};
pub use reader::DocumentReader;
pub use section::{Document, RhetoricalRole, Section, SectionDraft};
