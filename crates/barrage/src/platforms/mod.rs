//! Platform wire-protocol implementations.

pub mod douyu;
pub mod panda;
pub mod quanmin;

pub use douyu::Douyu;
pub use panda::Panda;
pub use quanmin::Quanmin;
