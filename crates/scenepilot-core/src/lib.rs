pub mod catalog;
mod error;
mod fragment;
pub mod generator;
pub mod history;
mod model;
pub mod safety;
pub mod script;
pub mod syntax;
mod validation;

pub use error::*;
pub use fragment::*;
pub use model::*;
pub use validation::*;
