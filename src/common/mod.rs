pub mod responses;
pub mod utils;
