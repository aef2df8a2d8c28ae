mod error;
mod types;
mod value;

pub use error::{ReconcileError, Result};
pub use types::{CancelToken, Id, InputRecord, Record};
pub use value::Value;
