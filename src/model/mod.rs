mod document;
mod job;
mod operation;

pub use document::*;
pub use job::*;
pub use operation::*;
