pub mod error;
pub mod merger;

pub use error::MergeError;
pub use merger::{merge_elements, merge_group, Fragment, MergeResult};
