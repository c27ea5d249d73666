pub mod agent;
pub mod context;
pub mod mentions;
pub mod messages;
pub mod posts;
pub mod retry;
pub mod runtime;
pub mod scheduler;
pub mod state;

#[cfg(test)]
mod tests;
