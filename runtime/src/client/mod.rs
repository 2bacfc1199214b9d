pub use cache::*;
pub use client::*;
pub use transport::*;

mod cache;
#[allow(clippy::module_inception)]
mod client;
mod transport;

#[cfg(test)]
mod client_test;
