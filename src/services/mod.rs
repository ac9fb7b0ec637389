pub mod convert;
pub mod geometry;
pub mod html;
pub mod keystore;
pub mod render;
pub mod signer;
