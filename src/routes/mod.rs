pub mod convert;
pub mod sign;
pub mod web;
