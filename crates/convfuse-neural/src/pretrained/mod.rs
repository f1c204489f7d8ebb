//! Reference network topologies.
//!
//! - **common**: convolution blocks shared by the topologies
//! - **skynet**: the SkyNet detector backbone

pub mod common;
pub mod skynet;

pub use common::{conv_bn, conv_dw};
pub use skynet::SkyNet;
