pub use metadata::*;
pub use service::*;

mod metadata;
mod service;

#[cfg(test)]
mod service_test;
