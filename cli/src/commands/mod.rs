pub mod simulate;
pub mod types;
