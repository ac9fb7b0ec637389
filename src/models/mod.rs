pub mod convert;
pub mod sign;
