//! rmetric のオフライン評価ツール群

pub mod common;
pub mod records;
