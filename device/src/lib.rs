pub mod actuator;
pub mod camera;
pub mod dispatch;
pub mod encoder;
pub mod server;
pub mod streamer;
