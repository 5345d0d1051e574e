//! Report assembly: elapsed-time formatting, the pure table builder, and the
//! XLSX writer that turns a [`builder::Report`] into bytes on disk.

pub mod builder;
pub mod duration;
pub mod writer;
