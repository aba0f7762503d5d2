mod mem_operation_store;

pub use mem_operation_store::*;
