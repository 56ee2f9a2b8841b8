// Process-wide client state — response cache, request counters, background jobs.

pub mod cache;
pub mod jobs;
pub mod stats;
