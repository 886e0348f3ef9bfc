//! End-to-end tests against a real mount.
//!
//! These need a working FUSE installation and are ignored by default. Run with:
//!
//!     cargo test --test integration -- --ignored --test-threads=1

#[path = "../helpers/mod.rs"]
mod helpers;

mod basic_io;
