// Public request surface — the REST client, its error-body handling, and uploads.

pub mod client;
pub mod error_body;
pub mod upload;
