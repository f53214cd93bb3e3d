//! Order types shared by both transports.

pub mod enums;
pub mod order;

pub use enums::*;
pub use order::*;
