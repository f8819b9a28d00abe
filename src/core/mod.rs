pub mod error;
pub mod value;

pub use error::{ClusterError, Result};
pub use value::{Arg, Reply};
