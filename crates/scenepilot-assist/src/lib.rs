mod analyzer;
mod operations;
mod parse;

pub use analyzer::*;
pub use operations::{Runtime, detect_operations};

#[cfg(test)]
mod tests;
