pub mod browser;
pub mod create_api;
pub mod media;
pub mod x;

#[cfg(test)]
mod tests;
