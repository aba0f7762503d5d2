mod awaiter;
mod job_executor;
mod job_tracker;
mod manager;

pub use awaiter::*;
pub use job_executor::*;
pub use job_tracker::*;
pub use manager::*;

#[cfg(test)]
mod awaiter_test;
#[cfg(test)]
mod job_executor_test;
#[cfg(test)]
mod job_tracker_test;
#[cfg(test)]
mod manager_test;
