pub mod health;
pub mod processed;
pub mod tasks;
pub mod upload;
