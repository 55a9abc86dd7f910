//! Password strength rules.
//!
//! Each rule is a plain function over the candidate password and the account
//! it belongs to. [`PasswordPolicy`] runs the configured rules in order and
//! reports every failure, not just the first.

use anyhow::{Context, Result};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use crate::config::{PasswordPolicyConfig, PasswordRule};

const BUILTIN_COMMON_PASSWORDS: &str = include_str!("common_passwords.txt");

/// Account attributes a password must not resemble.
#[derive(Debug, Clone, Copy, Default)]
pub struct PasswordContext<'a> {
    pub username: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub email: &'a str,
}

impl PasswordContext<'_> {
    fn attributes(&self) -> [(&'static str, &str); 4] {
        [
            ("username", self.username),
            ("first name", self.first_name),
            ("last name", self.last_name),
            ("email address", self.email),
        ]
    }
}

pub type RuleCheck = fn(&str, &PasswordContext<'_>, &PasswordPolicy) -> Result<(), String>;

#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    rules: Vec<PasswordRule>,
    min_length: usize,
    max_similarity: f64,
    common_passwords: HashSet<String>,
}

impl PasswordPolicy {
    pub fn from_config(config: &PasswordPolicyConfig) -> Result<Self> {
        let common_passwords = match &config.common_passwords_path {
            Some(path) => {
                let content = std::fs::read_to_string(path).with_context(|| {
                    format!("Failed to read common password list: {}", path.display())
                })?;
                parse_password_list(&content)
            }
            None => parse_password_list(BUILTIN_COMMON_PASSWORDS),
        };

        Ok(Self {
            rules: config.rules.clone(),
            min_length: config.min_length,
            max_similarity: config.max_similarity,
            common_passwords,
        })
    }

    #[must_use]
    pub fn rules(&self) -> &[PasswordRule] {
        &self.rules
    }

    /// Runs every configured rule; an empty result means the password passes.
    #[must_use]
    pub fn validate(&self, password: &str, context: &PasswordContext<'_>) -> Vec<String> {
        self.rules
            .iter()
            .filter_map(|rule| rule_check(*rule)(password, context, self).err())
            .collect()
    }
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            rules: PasswordPolicyConfig::default().rules,
            min_length: PasswordPolicyConfig::default().min_length,
            max_similarity: PasswordPolicyConfig::default().max_similarity,
            common_passwords: parse_password_list(BUILTIN_COMMON_PASSWORDS),
        }
    }
}

fn parse_password_list(content: &str) -> HashSet<String> {
    content
        .lines()
        .map(|line| line.trim().to_lowercase())
        .filter(|line| !line.is_empty())
        .collect()
}

#[must_use]
pub fn rule_check(rule: PasswordRule) -> RuleCheck {
    match rule {
        PasswordRule::UserAttributeSimilarity => user_attribute_similarity,
        PasswordRule::MinimumLength => minimum_length,
        PasswordRule::CommonPassword => common_password,
        PasswordRule::Numeric => numeric,
    }
}

fn non_word_separator() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\W+").expect("Invalid regex"))
}

pub fn user_attribute_similarity(
    password: &str,
    context: &PasswordContext<'_>,
    policy: &PasswordPolicy,
) -> Result<(), String> {
    let password_lower = password.to_lowercase();

    for (label, value) in context.attributes() {
        if value.is_empty() {
            continue;
        }

        let value_lower = value.to_lowercase();
        if exceeds_maximum_length_ratio(&password_lower, policy.max_similarity, &value_lower) {
            continue;
        }

        let parts = non_word_separator()
            .split(&value_lower)
            .chain(std::iter::once(value_lower.as_str()));

        for part in parts.filter(|p| !p.is_empty()) {
            if quick_ratio(&password_lower, part) >= policy.max_similarity {
                return Err(format!("The password is too similar to the {label}."));
            }
        }
    }

    Ok(())
}

pub fn minimum_length(
    password: &str,
    _context: &PasswordContext<'_>,
    policy: &PasswordPolicy,
) -> Result<(), String> {
    if password.chars().count() >= policy.min_length {
        return Ok(());
    }

    let unit = if policy.min_length == 1 {
        "character"
    } else {
        "characters"
    };
    Err(format!(
        "This password is too short. It must contain at least {} {unit}.",
        policy.min_length
    ))
}

pub fn common_password(
    password: &str,
    _context: &PasswordContext<'_>,
    policy: &PasswordPolicy,
) -> Result<(), String> {
    if policy
        .common_passwords
        .contains(&password.trim().to_lowercase())
    {
        return Err("This password is too common.".to_string());
    }
    Ok(())
}

pub fn numeric(
    password: &str,
    _context: &PasswordContext<'_>,
    _policy: &PasswordPolicy,
) -> Result<(), String> {
    if !password.is_empty() && password.chars().all(|c| c.is_ascii_digit()) {
        return Err("This password is entirely numeric.".to_string());
    }
    Ok(())
}

/// A long password cannot be "too similar" to a much shorter attribute.
fn exceeds_maximum_length_ratio(password: &str, max_similarity: f64, value: &str) -> bool {
    let pwd_len = password.chars().count();
    let value_len = value.chars().count();
    let length_bound_similarity = max_similarity / 2.0 * pwd_len as f64;

    pwd_len >= 10 * value_len && (value_len as f64) < length_bound_similarity
}

/// Upper bound on sequence similarity: shared characters regardless of order.
fn quick_ratio(a: &str, b: &str) -> f64 {
    let mut available: HashMap<char, usize> = HashMap::new();
    for c in b.chars() {
        *available.entry(c).or_default() += 1;
    }

    let mut matches = 0usize;
    for c in a.chars() {
        if let Some(count) = available.get_mut(&c)
            && *count > 0
        {
            *count -= 1;
            matches += 1;
        }
    }

    let total = a.chars().count() + b.chars().count();
    if total == 0 {
        return 1.0;
    }
    2.0 * matches as f64 / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bob() -> PasswordContext<'static> {
        PasswordContext {
            username: "bob",
            first_name: "Bob",
            last_name: "B",
            email: "bob@x.com",
        }
    }

    #[test]
    fn test_strong_password_passes() {
        let policy = PasswordPolicy::default();
        assert!(policy.validate("Str0ngPass!", &bob()).is_empty());
    }

    #[test]
    fn test_all_failures_reported_in_rule_order() {
        let policy = PasswordPolicy::default();
        let errors = policy.validate("1234", &bob());
        assert_eq!(
            errors,
            vec![
                "This password is too short. It must contain at least 8 characters.".to_string(),
                "This password is too common.".to_string(),
                "This password is entirely numeric.".to_string(),
            ]
        );
    }

    #[test]
    fn test_similar_to_username() {
        let policy = PasswordPolicy::default();
        let context = PasswordContext {
            username: "alexander",
            ..PasswordContext::default()
        };
        assert_eq!(
            user_attribute_similarity("Alexander1", &context, &policy),
            Err("The password is too similar to the username.".to_string())
        );
    }

    #[test]
    fn test_similar_to_email_part() {
        let policy = PasswordPolicy::default();
        let context = PasswordContext {
            email: "margaret.hamilton@example.com",
            ..PasswordContext::default()
        };
        assert_eq!(
            user_attribute_similarity("hamilton99", &context, &policy),
            Err("The password is too similar to the email address.".to_string())
        );
    }

    #[test]
    fn test_short_attribute_skipped_for_long_password() {
        let policy = PasswordPolicy::default();
        let context = PasswordContext {
            last_name: "B",
            ..PasswordContext::default()
        };
        assert!(user_attribute_similarity("bbbbbbbbbbbbbbbbbbbb", &context, &policy).is_ok());
    }

    #[test]
    fn test_minimum_length_singular() {
        let config = PasswordPolicyConfig {
            min_length: 1,
            ..PasswordPolicyConfig::default()
        };
        let policy = PasswordPolicy::from_config(&config).unwrap();
        assert_eq!(
            minimum_length("", &PasswordContext::default(), &policy),
            Err("This password is too short. It must contain at least 1 character.".to_string())
        );
    }

    #[test]
    fn test_common_password_is_case_insensitive() {
        let policy = PasswordPolicy::default();
        let context = PasswordContext::default();
        assert!(common_password("  PassWord ", &context, &policy).is_err());
        assert!(common_password("correct horse battery", &context, &policy).is_ok());
    }

    #[test]
    fn test_numeric() {
        let policy = PasswordPolicy::default();
        let context = PasswordContext::default();
        assert!(numeric("9081726354", &context, &policy).is_err());
        assert!(numeric("9081726354a", &context, &policy).is_ok());
    }

    #[test]
    fn test_rules_follow_configuration() {
        let config = PasswordPolicyConfig {
            rules: vec![PasswordRule::Numeric],
            ..PasswordPolicyConfig::default()
        };
        let policy = PasswordPolicy::from_config(&config).unwrap();
        assert_eq!(policy.rules(), &[PasswordRule::Numeric]);
        assert!(policy.validate("password", &bob()).is_empty());
        assert_eq!(policy.validate("42", &bob()).len(), 1);
    }

    #[test]
    fn test_custom_common_password_file() {
        let path = std::env::temp_dir().join(format!("roster-common-{}.txt", uuid::Uuid::new_v4()));
        std::fs::write(&path, "Zebra-Crossing\n\n").unwrap();

        let config = PasswordPolicyConfig {
            common_passwords_path: Some(path.clone()),
            ..PasswordPolicyConfig::default()
        };
        let policy = PasswordPolicy::from_config(&config).unwrap();
        let context = PasswordContext::default();

        assert!(common_password("zebra-crossing", &context, &policy).is_err());
        assert!(common_password("password", &context, &policy).is_ok());

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_quick_ratio() {
        assert!((quick_ratio("abcd", "abcd") - 1.0).abs() < f64::EPSILON);
        assert!((quick_ratio("abcd", "wxyz")).abs() < f64::EPSILON);
        assert!((quick_ratio("aab", "ab") - 0.8).abs() < 1e-9);
    }
}
