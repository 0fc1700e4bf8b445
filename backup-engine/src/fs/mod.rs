pub mod copy;
pub mod filter;
pub mod walker;
