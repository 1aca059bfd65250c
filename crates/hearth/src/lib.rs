pub mod agent;
pub mod assembler;
pub mod conversation;
pub mod engines;
pub mod errors;
pub mod models;
pub mod session;
pub mod tools;
