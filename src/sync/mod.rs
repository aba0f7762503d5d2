mod awaiter;
mod channel;
mod consistency;
mod gql;
mod internal;
mod mailbox;
mod manager;
mod remote;
mod status_tracker;
mod sync_operation;
mod utils;

pub use awaiter::*;
pub use channel::*;
pub use consistency::*;
pub use gql::*;
pub use internal::*;
pub use mailbox::*;
pub use manager::*;
pub use remote::*;
pub use status_tracker::*;
pub use sync_operation::*;
pub use utils::*;

#[cfg(test)]
mod mailbox_test;
#[cfg(test)]
mod status_tracker_test;
