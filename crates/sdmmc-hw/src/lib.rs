#![no_std]

pub mod protocol;
pub mod specs;
pub mod toshsd;
