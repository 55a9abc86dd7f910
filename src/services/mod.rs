pub mod password_policy;
pub use password_policy::{PasswordContext, PasswordPolicy};

pub mod account_validator;
pub use account_validator::{AccountPayload, AccountValidator, FieldErrors, ValidationMode};

pub mod account_service;
pub mod account_service_impl;
pub use account_service::{AccountError, AccountService};
pub use account_service_impl::SeaOrmAccountService;

pub mod auth_service;
pub mod auth_service_impl;
pub use auth_service::{AuthError, AuthGrant, AuthService};
pub use auth_service_impl::SeaOrmAuthService;
