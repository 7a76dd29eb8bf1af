//! Boundary between the adapter stack and the native radio stack.
#[macro_use]
extern crate num_derive;

pub mod btif;
