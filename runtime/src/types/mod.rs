pub use frame::*;
pub use query::*;

mod frame;
mod query;
