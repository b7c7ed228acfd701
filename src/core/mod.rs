pub mod catalog;
pub mod engine;
pub mod features;
pub mod savefile;
pub mod scanner;
pub mod similarity;

#[cfg(test)]
pub(crate) mod fixtures;
