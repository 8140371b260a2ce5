pub mod comments;
pub mod health;
pub mod reports;
pub mod votes;
