//! Protobuf messages generated from `cast_channel.proto` at build time.

include!(concat!(env!("OUT_DIR"), "/protos/mod.rs"));
