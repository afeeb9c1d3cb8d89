pub mod capture;
pub mod config;
pub mod extraction;
pub mod inference;
pub mod pipeline;
pub mod queue;
pub mod scheduler;
pub mod store;
pub mod worker;
