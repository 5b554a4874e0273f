pub mod channel;
pub mod file;
pub mod task;
pub mod upload;

pub use channel::*;
pub use file::*;
pub use task::*;
pub use upload::*;
