//! Field-level validation of incoming account data.
//!
//! Nothing here writes to the store; uniqueness is only looked up. The store
//! repeats the uniqueness check inside its write transaction.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::db::Store;
use crate::models::account::{Account, AccountChanges, NewAccount, UniqueField};
use crate::services::account_service::AccountError;
use crate::services::password_policy::{PasswordContext, PasswordPolicy};

pub const USERNAME_MAX_LENGTH: usize = 150;
pub const EMAIL_MAX_LENGTH: usize = 254;
pub const NAME_MAX_LENGTH: usize = 50;

const REQUIRED: &str = "This field is required.";
const BLANK: &str = "This field may not be blank.";
const INVALID_USERNAME: &str = "Enter a valid username. This value may contain only letters, numbers, and @/./+/-/_ characters.";
const INVALID_EMAIL: &str = "Enter a valid email address.";

/// Raw account fields as submitted by a client.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AccountPayload {
    pub username: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub password: Option<String>,
    pub is_active: Option<bool>,
    pub is_staff: Option<bool>,
}

/// Which fields must be present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    /// New account: every text field including the password.
    Create,
    /// Full replacement: identity and name fields; password optional.
    Replace,
    /// Only the fields that were sent.
    Partial,
}

impl ValidationMode {
    const fn requires_profile(self) -> bool {
        matches!(self, Self::Create | Self::Replace)
    }

    const fn requires_password(self) -> bool {
        matches!(self, Self::Create)
    }
}

/// Field name → messages, serialized as a flat JSON object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn has(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.0 {
            if !first {
                f.write_str("; ")?;
            }
            first = false;
            write!(f, "{field}: {}", messages.join(" "))?;
        }
        Ok(())
    }
}

#[must_use]
pub fn duplicate_message(field: UniqueField) -> String {
    format!("A user with that {field} already exists.")
}

#[derive(Clone)]
pub struct AccountValidator {
    store: Store,
    policy: Arc<PasswordPolicy>,
}

impl AccountValidator {
    #[must_use]
    pub const fn new(store: Store, policy: Arc<PasswordPolicy>) -> Self {
        Self { store, policy }
    }

    /// Validates a complete payload for a brand-new account.
    pub async fn validate_new(&self, payload: AccountPayload) -> Result<NewAccount, AccountError> {
        let mut errors = FieldErrors::new();
        let fields = clean_fields(&mut errors, payload, ValidationMode::Create);

        self.check_unique(&mut errors, &fields, None).await?;
        self.check_password(&mut errors, &fields, None);

        if !errors.is_empty() {
            return Err(AccountError::Validation(errors));
        }

        match fields {
            CleanFields {
                username: Some(username),
                email: Some(email),
                first_name: Some(first_name),
                last_name: Some(last_name),
                password: Some(password),
                is_active,
                is_staff,
            } => Ok(NewAccount {
                username,
                email,
                first_name,
                last_name,
                password,
                is_active: is_active.unwrap_or(true),
                is_staff: is_staff.unwrap_or(false),
            }),
            _ => Err(AccountError::Internal(
                "Validated account payload is missing fields".to_string(),
            )),
        }
    }

    /// Validates changes to `current` under `mode` (`Replace` or `Partial`).
    pub async fn validate_changes(
        &self,
        current: &Account,
        payload: AccountPayload,
        mode: ValidationMode,
    ) -> Result<AccountChanges, AccountError> {
        let mut errors = FieldErrors::new();
        let fields = clean_fields(&mut errors, payload, mode);

        self.check_unique(&mut errors, &fields, Some(current.id))
            .await?;
        self.check_password(&mut errors, &fields, Some(current));

        if !errors.is_empty() {
            return Err(AccountError::Validation(errors));
        }

        Ok(AccountChanges {
            username: fields.username,
            email: fields.email,
            first_name: fields.first_name,
            last_name: fields.last_name,
            password: fields.password,
            is_active: fields.is_active,
            is_staff: fields.is_staff,
        })
    }

    async fn check_unique(
        &self,
        errors: &mut FieldErrors,
        fields: &CleanFields,
        exclude: Option<i32>,
    ) -> Result<(), AccountError> {
        let candidates = [
            (UniqueField::Username, fields.username.as_deref()),
            (UniqueField::Email, fields.email.as_deref()),
        ];

        for (field, value) in candidates {
            let Some(value) = value else { continue };
            if self
                .store
                .is_account_field_taken(field, value, exclude)
                .await?
            {
                errors.add(field.as_str(), duplicate_message(field));
            }
        }

        Ok(())
    }

    fn check_password(
        &self,
        errors: &mut FieldErrors,
        fields: &CleanFields,
        current: Option<&Account>,
    ) {
        let Some(password) = fields.password.as_deref() else {
            return;
        };

        let pick = |new: &Option<String>, old: Option<&str>| -> String {
            new.clone()
                .or_else(|| old.map(str::to_string))
                .unwrap_or_default()
        };
        let username = pick(&fields.username, current.map(|a| a.username.as_str()));
        let first_name = pick(&fields.first_name, current.map(|a| a.first_name.as_str()));
        let last_name = pick(&fields.last_name, current.map(|a| a.last_name.as_str()));
        let email = pick(&fields.email, current.map(|a| a.email.as_str()));

        let context = PasswordContext {
            username: &username,
            first_name: &first_name,
            last_name: &last_name,
            email: &email,
        };

        for message in self.policy.validate(password, &context) {
            errors.add("password", message);
        }
    }
}

/// Format-checked, trimmed fields. A field is `None` when it was absent or
/// failed a check (the failure is recorded in the accompanying errors).
#[derive(Debug, Default)]
struct CleanFields {
    username: Option<String>,
    email: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    password: Option<String>,
    is_active: Option<bool>,
    is_staff: Option<bool>,
}

fn clean_fields(
    errors: &mut FieldErrors,
    payload: AccountPayload,
    mode: ValidationMode,
) -> CleanFields {
    let required = mode.requires_profile();

    let username = clean_text(
        errors,
        "username",
        payload.username,
        required,
        USERNAME_MAX_LENGTH,
    )
    .filter(|username| {
        let valid = is_valid_username(username);
        if !valid {
            errors.add("username", INVALID_USERNAME);
        }
        valid
    });

    let email = clean_text(errors, "email", payload.email, required, EMAIL_MAX_LENGTH)
        .and_then(|email| {
            let normalized = normalize_email(&email);
            if normalized.is_none() {
                errors.add("email", INVALID_EMAIL);
            }
            normalized
        });

    let first_name =
        clean_text(errors, "first_name", payload.first_name, required, NAME_MAX_LENGTH);
    let last_name =
        clean_text(errors, "last_name", payload.last_name, required, NAME_MAX_LENGTH);

    let password = match payload.password {
        None => {
            if mode.requires_password() {
                errors.add("password", REQUIRED);
            }
            None
        }
        Some(password) if password.trim().is_empty() => {
            errors.add("password", BLANK);
            None
        }
        Some(password) => Some(password),
    };

    CleanFields {
        username,
        email,
        first_name,
        last_name,
        password,
        is_active: payload.is_active,
        is_staff: payload.is_staff,
    }
}

fn clean_text(
    errors: &mut FieldErrors,
    field: &str,
    value: Option<String>,
    required: bool,
    max_length: usize,
) -> Option<String> {
    let Some(value) = value else {
        if required {
            errors.add(field, REQUIRED);
        }
        return None;
    };

    let trimmed = value.trim();
    if trimmed.is_empty() {
        errors.add(field, BLANK);
        return None;
    }

    if trimmed.chars().count() > max_length {
        errors.add(
            field,
            format!("Ensure this field has no more than {max_length} characters."),
        );
        return None;
    }

    Some(trimmed.to_string())
}

#[must_use]
pub fn is_valid_username(username: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[\w.@+-]+$").expect("Invalid regex"))
        .is_match(username)
}

/// Returns the address with its domain lower-cased, or `None` when it is not
/// a syntactically valid email address.
#[must_use]
pub fn normalize_email(email: &str) -> Option<String> {
    static USER_RE: OnceLock<Regex> = OnceLock::new();
    static DOMAIN_RE: OnceLock<Regex> = OnceLock::new();

    let (user, domain) = email.rsplit_once('@')?;

    let user_re = USER_RE.get_or_init(|| {
        Regex::new(r"^[-!#$%&'*+/=?^_`{}|~0-9A-Za-z]+(\.[-!#$%&'*+/=?^_`{}|~0-9A-Za-z]+)*$")
            .expect("Invalid regex")
    });
    let domain_re = DOMAIN_RE.get_or_init(|| {
        Regex::new(
            r"^(?:[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?\.)+(?:[A-Za-z]{2,63}|xn--[A-Za-z0-9-]{1,59})$",
        )
        .expect("Invalid regex")
    });

    let domain = domain.to_lowercase();
    if !user_re.is_match(user) || !(domain == "localhost" || domain_re.is_match(&domain)) {
        return None;
    }

    Some(format!("{user}@{domain}"))
}
