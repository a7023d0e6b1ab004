pub mod membership;
pub mod referrals;
pub mod users;
