pub mod host;
pub mod naming;
