pub mod app_state;
pub mod credentials;
pub mod events;
pub mod lifecycle;
pub mod transcript;
