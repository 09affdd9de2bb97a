pub mod decrypt;
pub mod misc;
pub mod proxy;
pub mod recordings;
