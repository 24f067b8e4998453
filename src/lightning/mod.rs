pub mod backend;
pub mod cln;
