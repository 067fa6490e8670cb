pub mod app;
pub mod hashing;

mod intern;
pub use intern::*;
