#![allow(dead_code)]

pub mod builders;
pub mod mock_screener;
pub mod test_db;

pub use builders::*;
pub use mock_screener::*;
pub use test_db::*;
