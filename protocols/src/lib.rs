pub mod builder;
pub mod icmp;

pub use builder::{BuildContext, PacketPlan, build};
