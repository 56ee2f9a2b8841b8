// Application start-up gate — liveness probe and staged session restore.

pub mod health;
pub mod sequencer;
