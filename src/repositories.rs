pub mod telegram;
pub mod users;
