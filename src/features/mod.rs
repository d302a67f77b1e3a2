pub mod cache;
pub mod notification;
