pub mod link;
pub mod telemetry;
pub mod udp;
