pub mod auth;
pub mod campaigns;
pub mod jobs;
pub mod leads;
pub mod templates;
pub mod webhooks;
