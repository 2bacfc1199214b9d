pub use ext::*;
pub use format::*;
pub use status_code::*;

mod ext;
mod format;
mod status_code;
