//! Site-specific page layouts

pub mod mvideo;
