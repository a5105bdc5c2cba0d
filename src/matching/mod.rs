pub mod column;
pub mod reorder;

pub use column::{Column, ColumnData, Scalar};
pub use reorder::*;
