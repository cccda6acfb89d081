#![deny(rust_2018_idioms)]

#[macro_use]
extern crate anyhow;

#[macro_use]
extern crate bitflags;

#[macro_use]
extern crate num_derive;

#[macro_use]
extern crate log;

#[cfg(test)]
extern crate quickcheck;

#[cfg(test)]
#[macro_use(quickcheck)]
extern crate quickcheck_macros;

#[macro_use]
mod macros;

pub mod commitgraph;
pub mod delta;
pub mod error;
pub mod hash;
pub mod index;
pub mod io;
pub mod obj;
pub mod pack;
pub mod pool;
pub mod serialize;
