//! Writing message content out to the filesystem.

pub mod attachment;
