extern crate chrono;

pub mod duration;
pub mod error;
pub mod label;
pub mod time;

pub mod prelude {
    pub use crate::duration::*;
    pub use crate::error::*;
    pub use crate::label::*;
    pub use crate::time::*;
}
