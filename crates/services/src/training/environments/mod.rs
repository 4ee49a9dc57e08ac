pub mod appworld;
pub mod bfcl;
