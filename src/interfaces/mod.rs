//! Thin I/O surfaces over the application core.

pub mod csv;
