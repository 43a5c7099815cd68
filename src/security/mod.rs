pub mod alerts;
pub mod events;
