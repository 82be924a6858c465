pub mod audio;
pub mod config;
pub mod error;
pub mod inference;
pub mod live;

#[cfg(test)]
mod testing;
