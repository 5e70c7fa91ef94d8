pub mod auth;
pub mod crypto;
pub mod hosted;
pub mod normalize;
pub mod processor;
pub mod quota;
pub mod render;
pub mod settings;
pub mod state;
pub mod store;
pub mod validation;
pub mod webhook;
