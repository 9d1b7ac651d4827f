mod logger;
pub use logger::*;

mod span;
pub use span::{WORKLOAD_SPAN, workload_span};
