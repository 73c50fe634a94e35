pub mod ports;

pub mod channel;
pub mod file_offers;
pub mod handlers;
pub mod health;
pub mod media;
pub mod peers;
pub mod registry;
pub mod room_session;
pub mod throttle;
pub mod transcript;
pub mod typing;
pub mod verify;
