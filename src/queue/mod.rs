mod job_queue;
mod plan;

pub use job_queue::*;
pub use plan::*;

#[cfg(test)]
mod job_queue_test;
