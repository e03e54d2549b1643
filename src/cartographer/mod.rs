//! The Cartographer (pool state)
//!
//! Batched, block-pinned reads of the Curve pool through Multicall3.

pub mod multicall;
pub mod stableswap;
