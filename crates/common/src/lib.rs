pub mod error;
pub mod types;

pub use error::{CadenceError, CadenceResult};
pub use types::ServiceInfo;
