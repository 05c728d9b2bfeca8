mod account;
mod model;

pub use account::*;
pub use model::*;
