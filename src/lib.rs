//! A multi-target ELF linker library crate: the `mold` binary (`src/bin/ld.rs`)
//! is a thin shell around [`driver::link`].

pub mod chunks;
pub mod context;
pub mod driver;
pub mod dynamic;
pub mod error;
pub mod gc;
pub mod got;
pub mod icf;
pub mod input;
pub mod layout;
pub mod mapped;
pub mod merge;
pub mod opt;
pub mod section;
pub mod symbol;
pub mod target;
pub mod writer;
