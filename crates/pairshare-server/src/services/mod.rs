pub mod store;
pub mod submissions;
