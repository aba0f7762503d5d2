mod document_model;

pub use document_model::*;
