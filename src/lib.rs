pub mod app;
pub mod bulk;
pub mod cli;
pub mod client;
pub mod config;
pub mod dashboard;
pub mod filter;
pub mod notify;
pub mod output;
pub mod plan;
pub mod record;
pub mod selection;

#[cfg(test)]
mod tests;
