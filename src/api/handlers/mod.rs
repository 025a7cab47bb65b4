pub mod auth;
pub mod designs;
pub mod download;
pub mod health;
pub mod purchases;
