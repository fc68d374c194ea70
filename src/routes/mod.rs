pub mod analytics;
pub mod auth;
pub mod budgets;
pub mod groups;
pub mod health;
pub mod notify;
pub mod requests;
pub mod roles;
pub mod users;
