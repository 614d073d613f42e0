//! Command and event types for the solvr text protocol.
//!
//! Outbound commands are a verb, a `|`, and `$`-separated fields:
//!
//! ```text
//! login|<login>$<sha256_hex>
//! reg|<login>$<hash>$<email>$<lastname>$<name>$<middlename>
//! reset|<email>
//! reset_confirm|<email>$<code>$<hash>
//! equation|linear|<sign><a>$<sign><b>
//! equation|quadratic|<sign><a>$<sign><b>$<sign><c>
//! ```
//!
//! The protocol has no escaping, so fields containing `|` or `$` are
//! rejected by [`encode`] instead of being written.

use std::fmt;

use crate::error::{DecodeError, EncodeError};

pub const VERB_SEPARATOR: char = '|';
pub const FIELD_SEPARATOR: char = '$';

const REGISTER_OK: &str = "register|ok";
const REGISTER_ERROR: &str = "register|error";
const AUTH_OK: &str = "auth|ok";
const AUTH_ERROR: &str = "auth|error";
const RESET_ERROR: &str = "reset|error";
const ANSWER_PREFIX: &str = "answer|";

/// Answer payloads that mean the equation could not be solved.
pub const FAILURE_REASONS: [&str; 3] = ["error", "infinity_solutions", "no_solution"];

/// Sign written in front of an equation coefficient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Sign {
    #[default]
    Plus,
    Minus,
}

impl Sign {
    #[must_use]
    pub fn as_char(self) -> char {
        match self {
            Sign::Plus => '+',
            Sign::Minus => '-',
        }
    }
}

impl fmt::Display for Sign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

impl TryFrom<char> for Sign {
    type Error = char;

    fn try_from(c: char) -> Result<Self, Self::Error> {
        match c {
            '+' => Ok(Sign::Plus),
            '-' => Ok(Sign::Minus),
            other => Err(other),
        }
    }
}

/// A client-initiated protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundCommand {
    Login {
        login: String,
        password_hash: String,
    },
    Register {
        login: String,
        password_hash: String,
        email: String,
        last_name: String,
        first_name: String,
        middle_name: String,
    },
    ResetRequestCode {
        email: String,
    },
    ResetConfirm {
        email: String,
        code: String,
        password_hash: String,
    },
    SolveLinear {
        sign_a: Sign,
        a: String,
        sign_b: Sign,
        b: String,
    },
    SolveQuadratic {
        sign_a: Sign,
        a: String,
        sign_b: Sign,
        b: String,
        sign_c: Sign,
        c: String,
    },
}

impl OutboundCommand {
    /// Leading verb of the encoded command.
    #[must_use]
    pub fn verb(&self) -> &'static str {
        match self {
            OutboundCommand::Login { .. } => "login",
            OutboundCommand::Register { .. } => "reg",
            OutboundCommand::ResetRequestCode { .. } => "reset",
            OutboundCommand::ResetConfirm { .. } => "reset_confirm",
            OutboundCommand::SolveLinear { .. } | OutboundCommand::SolveQuadratic { .. } => {
                "equation"
            }
        }
    }

    /// Event kinds the server answers this command with.
    #[must_use]
    pub fn response_kinds(&self) -> &'static [EventKind] {
        match self {
            OutboundCommand::Login { .. } => &[EventKind::AuthOk, EventKind::AuthError],
            OutboundCommand::Register { .. } => {
                &[EventKind::RegisterOk, EventKind::RegisterError]
            }
            OutboundCommand::ResetRequestCode { .. } | OutboundCommand::ResetConfirm { .. } => {
                &[EventKind::ResetError]
            }
            OutboundCommand::SolveLinear { .. } | OutboundCommand::SolveQuadratic { .. } => {
                &[EventKind::EquationOk, EventKind::EquationFail]
            }
        }
    }

    /// Named fields in wire order, used for delimiter validation.
    fn fields(&self) -> Vec<(&'static str, &str)> {
        match self {
            OutboundCommand::Login {
                login,
                password_hash,
            } => vec![("login", login.as_str()), ("password_hash", password_hash.as_str())],
            OutboundCommand::Register {
                login,
                password_hash,
                email,
                last_name,
                first_name,
                middle_name,
            } => vec![
                ("login", login.as_str()),
                ("password_hash", password_hash.as_str()),
                ("email", email.as_str()),
                ("last_name", last_name.as_str()),
                ("first_name", first_name.as_str()),
                ("middle_name", middle_name.as_str()),
            ],
            OutboundCommand::ResetRequestCode { email } => vec![("email", email.as_str())],
            OutboundCommand::ResetConfirm {
                email,
                code,
                password_hash,
            } => vec![
                ("email", email.as_str()),
                ("code", code.as_str()),
                ("password_hash", password_hash.as_str()),
            ],
            OutboundCommand::SolveLinear { a, b, .. } => vec![("a", a.as_str()), ("b", b.as_str())],
            OutboundCommand::SolveQuadratic { a, b, c, .. } => {
                vec![("a", a.as_str()), ("b", b.as_str()), ("c", c.as_str())]
            }
        }
    }
}

/// Human-readable form for logs. Password hashes are never printed.
impl fmt::Display for OutboundCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutboundCommand::Login { login, .. } => write!(f, "login({login})"),
            OutboundCommand::Register { login, email, .. } => {
                write!(f, "register({login}, {email})")
            }
            OutboundCommand::ResetRequestCode { email } => write!(f, "reset({email})"),
            OutboundCommand::ResetConfirm { email, .. } => write!(f, "reset_confirm({email})"),
            OutboundCommand::SolveLinear { sign_a, a, sign_b, b } => {
                write!(f, "linear({sign_a}{a}x {sign_b}{b} = 0)")
            }
            OutboundCommand::SolveQuadratic {
                sign_a,
                a,
                sign_b,
                b,
                sign_c,
                c,
            } => write!(f, "quadratic({sign_a}{a}x^2 {sign_b}{b}x {sign_c}{c} = 0)"),
        }
    }
}

/// Fieldless mirror of [`InboundEvent`], used as a subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    RegisterOk,
    RegisterError,
    AuthOk,
    AuthError,
    ResetError,
    EquationOk,
    EquationFail,
}

impl EventKind {
    pub const ALL: [EventKind; 7] = [
        EventKind::RegisterOk,
        EventKind::RegisterError,
        EventKind::AuthOk,
        EventKind::AuthError,
        EventKind::ResetError,
        EventKind::EquationOk,
        EventKind::EquationFail,
    ];
}

/// A server-initiated protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    RegisterOk,
    RegisterError,
    AuthOk,
    AuthError,
    ResetError,
    EquationOk { values: Vec<String> },
    EquationFail { reason: String },
}

impl InboundEvent {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            InboundEvent::RegisterOk => EventKind::RegisterOk,
            InboundEvent::RegisterError => EventKind::RegisterError,
            InboundEvent::AuthOk => EventKind::AuthOk,
            InboundEvent::AuthError => EventKind::AuthError,
            InboundEvent::ResetError => EventKind::ResetError,
            InboundEvent::EquationOk { .. } => EventKind::EquationOk,
            InboundEvent::EquationFail { .. } => EventKind::EquationFail,
        }
    }
}

impl fmt::Display for InboundEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InboundEvent::RegisterOk => write!(f, "register ok"),
            InboundEvent::RegisterError => write!(f, "register error"),
            InboundEvent::AuthOk => write!(f, "auth ok"),
            InboundEvent::AuthError => write!(f, "auth error"),
            InboundEvent::ResetError => write!(f, "reset error"),
            InboundEvent::EquationOk { values } => write!(f, "answer {}", values.join(" ")),
            InboundEvent::EquationFail { reason } => write!(f, "answer failed: {reason}"),
        }
    }
}

/// Encode a command into its wire text (without any frame terminator).
///
/// # Errors
///
/// Returns `EncodeError::IllegalDelimiter` if any field contains `|` or `$`,
/// and `EncodeError::ControlCharacter` if any field contains a control
/// character such as `\n`, which line framing treats as a frame boundary.
pub fn encode(command: &OutboundCommand) -> Result<String, EncodeError> {
    for (field, value) in command.fields() {
        if value.contains([VERB_SEPARATOR, FIELD_SEPARATOR]) {
            return Err(EncodeError::IllegalDelimiter { field });
        }
        if value.chars().any(char::is_control) {
            return Err(EncodeError::ControlCharacter { field });
        }
    }

    let text = match command {
        OutboundCommand::Login {
            login,
            password_hash,
        } => format!("login|{login}${password_hash}"),
        OutboundCommand::Register {
            login,
            password_hash,
            email,
            last_name,
            first_name,
            middle_name,
        } => format!(
            "reg|{login}${password_hash}${email}${last_name}${first_name}${middle_name}"
        ),
        OutboundCommand::ResetRequestCode { email } => format!("reset|{email}"),
        OutboundCommand::ResetConfirm {
            email,
            code,
            password_hash,
        } => format!("reset_confirm|{email}${code}${password_hash}"),
        OutboundCommand::SolveLinear { sign_a, a, sign_b, b } => {
            format!("equation|linear|{sign_a}{a}${sign_b}{b}")
        }
        OutboundCommand::SolveQuadratic {
            sign_a,
            a,
            sign_b,
            b,
            sign_c,
            c,
        } => format!("equation|quadratic|{sign_a}{a}${sign_b}{b}${sign_c}{c}"),
    };

    Ok(text)
}

/// Decode one complete frame into an event.
///
/// # Errors
///
/// Returns `DecodeError::Unrecognized` for invalid UTF-8 or text that matches
/// none of the known responses.
pub fn decode(frame: &[u8]) -> Result<InboundEvent, DecodeError> {
    let Ok(text) = std::str::from_utf8(frame) else {
        return Err(DecodeError::unrecognized(frame));
    };

    let event = match text {
        REGISTER_OK => InboundEvent::RegisterOk,
        REGISTER_ERROR => InboundEvent::RegisterError,
        AUTH_OK => InboundEvent::AuthOk,
        AUTH_ERROR => InboundEvent::AuthError,
        RESET_ERROR => InboundEvent::ResetError,
        _ => {
            let Some(payload) = text.strip_prefix(ANSWER_PREFIX) else {
                return Err(DecodeError::unrecognized(frame));
            };
            decode_answer(payload)
        }
    };

    Ok(event)
}

fn decode_answer(payload: &str) -> InboundEvent {
    let values: Vec<String> = payload
        .split(FIELD_SEPARATOR)
        .map(ToString::to_string)
        .collect();

    match values.first() {
        Some(first) if FAILURE_REASONS.contains(&first.as_str()) => InboundEvent::EquationFail {
            reason: first.clone(),
        },
        _ => InboundEvent::EquationOk { values },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn login(login: &str) -> OutboundCommand {
        OutboundCommand::Login {
            login: login.to_string(),
            password_hash: "ab12".to_string(),
        }
    }

    #[test]
    fn test_encode_login() {
        assert_eq!(encode(&login("alice")).unwrap(), "login|alice$ab12");
    }

    #[test]
    fn test_encode_register() {
        let cmd = OutboundCommand::Register {
            login: "alice".to_string(),
            password_hash: "ff00".to_string(),
            email: "alice@example.com".to_string(),
            last_name: "Liddell".to_string(),
            first_name: "Alice".to_string(),
            middle_name: String::new(),
        };
        assert_eq!(
            encode(&cmd).unwrap(),
            "reg|alice$ff00$alice@example.com$Liddell$Alice$"
        );
    }

    #[test]
    fn test_encode_reset_commands() {
        let request = OutboundCommand::ResetRequestCode {
            email: "bob@example.com".to_string(),
        };
        assert_eq!(encode(&request).unwrap(), "reset|bob@example.com");

        let confirm = OutboundCommand::ResetConfirm {
            email: "bob@example.com".to_string(),
            code: "4821".to_string(),
            password_hash: "beef".to_string(),
        };
        assert_eq!(
            encode(&confirm).unwrap(),
            "reset_confirm|bob@example.com$4821$beef"
        );
    }

    #[test]
    fn test_encode_equations() {
        let linear = OutboundCommand::SolveLinear {
            sign_a: Sign::Plus,
            a: "2".to_string(),
            sign_b: Sign::Minus,
            b: "8".to_string(),
        };
        assert_eq!(encode(&linear).unwrap(), "equation|linear|+2$-8");

        let quadratic = OutboundCommand::SolveQuadratic {
            sign_a: Sign::Plus,
            a: "1".to_string(),
            sign_b: Sign::Minus,
            b: "8".to_string(),
            sign_c: Sign::Minus,
            c: "48".to_string(),
        };
        assert_eq!(encode(&quadratic).unwrap(), "equation|quadratic|+1$-8$-48");
    }

    #[test]
    fn test_encode_rejects_dollar_in_login() {
        let err = encode(&login("ali$ce")).unwrap_err();
        assert_eq!(err, EncodeError::IllegalDelimiter { field: "login" });
    }

    #[test]
    fn test_encode_rejects_pipe_in_any_field() {
        let cmd = OutboundCommand::Register {
            login: "alice".to_string(),
            password_hash: "ff00".to_string(),
            email: "alice@example.com".to_string(),
            last_name: "Lid|dell".to_string(),
            first_name: "Alice".to_string(),
            middle_name: String::new(),
        };
        assert_eq!(
            encode(&cmd).unwrap_err(),
            EncodeError::IllegalDelimiter { field: "last_name" }
        );

        let eq = OutboundCommand::SolveLinear {
            sign_a: Sign::Plus,
            a: "1$2".to_string(),
            sign_b: Sign::Plus,
            b: "3".to_string(),
        };
        assert_eq!(
            encode(&eq).unwrap_err(),
            EncodeError::IllegalDelimiter { field: "a" }
        );
    }

    #[test]
    fn test_encode_rejects_control_characters() {
        assert_eq!(
            encode(&login("alice\nauth|ok")).unwrap_err(),
            EncodeError::IllegalDelimiter { field: "login" }
        );
        assert_eq!(
            encode(&login("alice\n")).unwrap_err(),
            EncodeError::ControlCharacter { field: "login" }
        );

        let confirm = OutboundCommand::ResetConfirm {
            email: "alice@example.com".to_string(),
            code: "12\r34".to_string(),
            password_hash: "ff00".to_string(),
        };
        assert_eq!(
            encode(&confirm).unwrap_err(),
            EncodeError::ControlCharacter { field: "code" }
        );

        let tabbed = OutboundCommand::ResetRequestCode {
            email: "a\tb@example.com".to_string(),
        };
        assert!(encode(&tabbed).is_err());
    }

    #[test]
    fn test_decode_literals() {
        assert_eq!(decode(b"register|ok").unwrap(), InboundEvent::RegisterOk);
        assert_eq!(decode(b"register|error").unwrap(), InboundEvent::RegisterError);
        assert_eq!(decode(b"auth|ok").unwrap(), InboundEvent::AuthOk);
        assert_eq!(decode(b"auth|error").unwrap(), InboundEvent::AuthError);
        assert_eq!(decode(b"reset|error").unwrap(), InboundEvent::ResetError);
    }

    #[test]
    fn test_decode_answer_values() {
        assert_eq!(
            decode(b"answer|12$-4").unwrap(),
            InboundEvent::EquationOk {
                values: vec!["12".to_string(), "-4".to_string()]
            }
        );
        assert_eq!(
            decode(b"answer|4").unwrap(),
            InboundEvent::EquationOk {
                values: vec!["4".to_string()]
            }
        );
    }

    #[test]
    fn test_decode_answer_failures() {
        for reason in FAILURE_REASONS {
            let frame = format!("answer|{reason}");
            assert_eq!(
                decode(frame.as_bytes()).unwrap(),
                InboundEvent::EquationFail {
                    reason: reason.to_string()
                }
            );
        }
    }

    #[test]
    fn test_decode_failure_reason_only_in_first_component() {
        assert_eq!(
            decode(b"answer|3$error").unwrap(),
            InboundEvent::EquationOk {
                values: vec!["3".to_string(), "error".to_string()]
            }
        );
    }

    #[test]
    fn test_decode_empty_answer_is_ok_with_empty_value() {
        assert_eq!(
            decode(b"answer|").unwrap(),
            InboundEvent::EquationOk {
                values: vec![String::new()]
            }
        );
    }

    #[test]
    fn test_decode_unrecognized() {
        assert!(matches!(
            decode(b"auth|maybe"),
            Err(DecodeError::Unrecognized { .. })
        ));
        assert!(matches!(decode(b""), Err(DecodeError::Unrecognized { .. })));
        assert!(matches!(
            decode(b"auth|ok\n"),
            Err(DecodeError::Unrecognized { .. })
        ));
        assert!(matches!(
            decode(&[0xff, 0xfe]),
            Err(DecodeError::Unrecognized { .. })
        ));
    }

    #[test]
    fn test_decode_is_deterministic() {
        for frame in [&b"auth|ok"[..], b"answer|1$2", b"garbage"] {
            assert_eq!(decode(frame), decode(frame));
        }
    }

    #[test]
    fn test_event_kind_matches_variant() {
        assert_eq!(InboundEvent::AuthOk.kind(), EventKind::AuthOk);
        assert_eq!(
            InboundEvent::EquationFail {
                reason: "error".to_string()
            }
            .kind(),
            EventKind::EquationFail
        );
    }

    #[test]
    fn test_response_kinds() {
        assert_eq!(
            login("a").response_kinds(),
            &[EventKind::AuthOk, EventKind::AuthError]
        );
        let reset = OutboundCommand::ResetRequestCode {
            email: "a@b.c".to_string(),
        };
        assert_eq!(reset.response_kinds(), &[EventKind::ResetError]);
    }

    #[test]
    fn test_display_redacts_password_hash() {
        let shown = login("alice").to_string();
        assert!(shown.contains("alice"));
        assert!(!shown.contains("ab12"));
    }

    #[test]
    fn test_sign_from_char() {
        assert_eq!(Sign::try_from('+'), Ok(Sign::Plus));
        assert_eq!(Sign::try_from('-'), Ok(Sign::Minus));
        assert_eq!(Sign::try_from('x'), Err('x'));
    }
}
