//! TCP proxying toward the current primary.

mod listener;
mod session;

pub use listener::{Listener, ListenerStats};
