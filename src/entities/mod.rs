pub mod prelude;

pub mod accounts;
pub mod auth_tokens;
