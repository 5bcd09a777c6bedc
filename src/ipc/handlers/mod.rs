pub mod backup;
pub mod core;
pub mod permissions;
pub mod setup;
