pub mod admin;
pub mod events;
pub mod public;
pub mod staff;
