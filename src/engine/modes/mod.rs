//! The seven connection behaviours
//!
//! Each submodule adds one mode loop to [`ConnectionHandler`](super::ConnectionHandler).
//! A loop returns `Ok(())` when the server ends the connection on purpose
//! and `Err(cause)` for everything else.

mod close_first;
mod conversation;
mod echo;
mod response;
mod silent;
mod stream;
mod validation;

#[cfg(test)]
mod tests;

pub use validation::Verdict;
