pub mod domain;
pub mod error;
pub mod layout;
pub mod state;
