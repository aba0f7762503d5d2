mod async_task;
mod time;

pub use async_task::*;
pub use time::*;

#[cfg(test)]
mod async_task_test;
#[cfg(test)]
mod time_test;
