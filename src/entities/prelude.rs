pub use super::accounts::Entity as Accounts;
pub use super::auth_tokens::Entity as AuthTokens;
