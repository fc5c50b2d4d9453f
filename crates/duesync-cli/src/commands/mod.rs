pub mod auth;
pub mod settings;
pub mod status;
pub mod sync;
