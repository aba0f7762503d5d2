mod builder;
mod reactor;

pub use builder::*;
pub use reactor::*;

#[cfg(test)]
mod reactor_test;
