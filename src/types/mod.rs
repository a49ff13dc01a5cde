pub mod document;
pub mod hook;
