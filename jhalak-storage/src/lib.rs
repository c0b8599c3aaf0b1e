mod memory;
mod store;

pub use memory::*;
pub use store::*;
