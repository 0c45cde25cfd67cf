pub mod protos;

pub use protos::cast_channel;
