use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    email.len() <= 254 && EMAIL_RE.is_match(email)
}

/// At least 8 characters with lower, upper, digit and symbol.
pub(crate) fn password_problems(password: &str) -> Vec<&'static str> {
    let mut missing = Vec::new();
    if password.chars().count() < 8 {
        missing.push("at least 8 characters");
    }
    if !password.chars().any(|c| c.is_lowercase()) {
        missing.push("a lowercase letter");
    }
    if !password.chars().any(|c| c.is_uppercase()) {
        missing.push("an uppercase letter");
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        missing.push("a digit");
    }
    if !password.chars().any(|c| !c.is_alphanumeric()) {
        missing.push("a symbol");
    }
    missing
}

/// Registration accepts initials; profile edits ask for real names.
pub const REGISTRATION_NAME_MIN: usize = 1;
pub const PROFILE_NAME_MIN: usize = 2;

fn check_name(
    field: &'static str,
    label: &str,
    value: &str,
    min: usize,
    errors: &mut Vec<FieldError>,
) {
    if value.is_empty() {
        errors.push(FieldError::new(field, format!("{label} is required")));
    } else if value.chars().count() < min {
        errors.push(FieldError::new(
            field,
            format!("{label} must be at least {min} characters long"),
        ));
    } else if value.chars().count() > 50 {
        errors.push(FieldError::new(
            field,
            format!("{label} must be at most 50 characters long"),
        ));
    }
}

/// Validates trimmed first and last names.
pub fn validate_names(
    first_name: &str,
    last_name: &str,
    min: usize,
) -> Result<(), Vec<FieldError>> {
    let mut errors = Vec::new();
    check_name("firstName", "First name", first_name, min, &mut errors);
    check_name("lastName", "Last name", last_name, min, &mut errors);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

pub fn validate_registration(
    email: &str,
    password: &str,
    first_name: &str,
    last_name: &str,
) -> Result<(), Vec<FieldError>> {
    let mut errors = Vec::new();

    if email.is_empty() {
        errors.push(FieldError::new("email", "Email is required"));
    } else if !is_valid_email(email) {
        errors.push(FieldError::new("email", "Please provide a valid email address"));
    }

    if password.is_empty() {
        errors.push(FieldError::new("password", "Password is required"));
    } else {
        let missing = password_problems(password);
        if !missing.is_empty() {
            errors.push(FieldError::new(
                "password",
                format!("Password must contain {}", missing.join(", ")),
            ));
        }
    }

    if let Err(mut name_errors) = validate_names(first_name, last_name, REGISTRATION_NAME_MIN) {
        errors.append(&mut name_errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Shape only. Strength is a registration rule.
pub fn validate_login(email: &str, password: &str) -> Result<(), Vec<FieldError>> {
    let mut errors = Vec::new();
    if !is_valid_email(email) {
        errors.push(FieldError::new("email", "Please provide a valid email address"));
    }
    if password.is_empty() {
        errors.push(FieldError::new("password", "Password is required"));
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
