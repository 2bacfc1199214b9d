pub use calculator::*;
pub use resolver::*;
pub use variables::*;

mod calculator;
mod resolver;
mod variables;
