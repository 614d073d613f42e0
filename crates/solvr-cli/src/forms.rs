//! Field checks run before anything is encoded and sent.

use rand::Rng;
use rand::seq::{IndexedRandom, SliceRandom};
use solvr_protocol::Sign;

pub const MIN_PASSWORD_LEN: usize = 5;
pub const MAX_EMAIL_LEN: usize = 254;

const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const DIGITS: &[u8] = b"0123456789";
/// Punctuation usable in passwords; excludes the protocol delimiters.
const SPECIAL: &[u8] = b"!\"#%&'()*+,-./:;<=>?@[\\]^_`{}";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormError {
    #[error("Login must be non-empty and contain only latin letters and digits")]
    InvalidLogin,

    #[error("Password must be at least {MIN_PASSWORD_LEN} characters long")]
    PasswordTooShort,

    #[error("Password must not contain '|' or '$'")]
    PasswordDelimiter,

    #[error("Password may only contain latin letters, digits and punctuation")]
    PasswordCharset,

    #[error("Password needs at least one digit, one uppercase letter and one punctuation mark")]
    PasswordTooWeak,

    #[error("Invalid email address: {0}")]
    InvalidEmail(&'static str),

    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("'{0}' is not a number")]
    InvalidCoefficient(String),
}

/// # Errors
///
/// Returns `FormError::InvalidLogin` unless `login` is non-empty ASCII letters and digits.
pub fn validate_login(login: &str) -> Result<(), FormError> {
    if login.is_empty() || !login.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(FormError::InvalidLogin);
    }
    Ok(())
}

/// # Errors
///
/// Returns the first rule `password` breaks.
pub fn validate_password(password: &str) -> Result<(), FormError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(FormError::PasswordTooShort);
    }
    if password.contains(['|', '$']) {
        return Err(FormError::PasswordDelimiter);
    }
    if !password.chars().all(|c| c.is_ascii_graphic()) {
        return Err(FormError::PasswordCharset);
    }

    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    let has_upper = password.chars().any(|c| c.is_ascii_uppercase());
    let has_punct = password.chars().any(|c| c.is_ascii_punctuation());
    if !(has_digit && has_upper && has_punct) {
        return Err(FormError::PasswordTooWeak);
    }

    Ok(())
}

/// # Errors
///
/// Returns `FormError::InvalidEmail` naming the broken rule.
pub fn validate_email(email: &str) -> Result<(), FormError> {
    if email.len() > MAX_EMAIL_LEN {
        return Err(FormError::InvalidEmail("longer than 254 characters"));
    }

    let mut parts = email.split('@');
    let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(FormError::InvalidEmail("expected exactly one '@'"));
    };

    if local.is_empty() || domain.is_empty() {
        return Err(FormError::InvalidEmail("empty local or domain part"));
    }
    if local.starts_with('.') {
        return Err(FormError::InvalidEmail("local part starts with '.'"));
    }
    if !domain.contains('.') {
        return Err(FormError::InvalidEmail("domain has no '.'"));
    }
    if !email.chars().all(|c| c.is_ascii_graphic()) || email.contains(['|', '$']) {
        return Err(FormError::InvalidEmail("unsupported character"));
    }

    Ok(())
}

/// # Errors
///
/// Returns `FormError::Empty(field)` for blank input.
pub fn require(value: &str, field: &'static str) -> Result<(), FormError> {
    if value.trim().is_empty() {
        return Err(FormError::Empty(field));
    }
    Ok(())
}

/// Split a signed coefficient such as `-3.5` or `2e-3` into its sign and magnitude.
///
/// The magnitude is sent as typed: `.` is the only decimal separator and an
/// exponent is allowed.
///
/// # Errors
///
/// Returns `FormError::InvalidCoefficient` unless the input is a finite number.
pub fn parse_coefficient(input: &str) -> Result<(Sign, String), FormError> {
    let trimmed = input.trim();
    let (sign, magnitude) = match trimmed.as_bytes().first() {
        Some(b'-') => (Sign::Minus, &trimmed[1..]),
        Some(b'+') => (Sign::Plus, &trimmed[1..]),
        _ => (Sign::Plus, trimmed),
    };

    let valid = magnitude.starts_with(|c: char| c.is_ascii_digit() || c == '.')
        && magnitude
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'))
        && magnitude.parse::<f64>().is_ok_and(f64::is_finite);
    if !valid {
        return Err(FormError::InvalidCoefficient(input.to_string()));
    }

    Ok((sign, magnitude.to_string()))
}

/// Random password of 7 to 15 characters that passes [`validate_password`].
#[must_use]
pub fn generate_password() -> String {
    let mut rng = rand::rng();
    let length = rng.random_range(7..16);

    let mut password: Vec<u8> = Vec::with_capacity(length);
    for class in [UPPER, LOWER, DIGITS, SPECIAL] {
        password.extend(class.choose(&mut rng));
    }

    let alphabet: Vec<u8> = [UPPER, LOWER, DIGITS, SPECIAL].concat();
    while password.len() < length {
        password.extend(alphabet.choose(&mut rng));
    }
    password.shuffle(&mut rng);

    password.into_iter().map(char::from).collect()
}
