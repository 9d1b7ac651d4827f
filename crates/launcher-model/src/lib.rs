mod domain;
pub use domain::*;

mod message;
pub use message::*;
