pub mod campaign;
pub mod job;
pub mod lead;
pub mod template;
pub mod user;
