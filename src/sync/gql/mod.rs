mod channel;
mod envelope;
mod transport;

pub use channel::*;
pub use envelope::*;
pub use transport::*;

#[cfg(test)]
mod envelope_test;
