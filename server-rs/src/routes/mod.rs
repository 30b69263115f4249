pub mod activity;
pub mod admin;
pub mod auth;
pub mod challenges;
pub mod friends;
pub mod health;
pub mod notifications;
pub mod shop;
pub mod users;
pub mod ws;
