pub mod executor;
pub mod filter;
