//! One connected client session and the replies it turns into user messages.

use std::fmt;

use anyhow::{Context, Result};
use solvr_client::{
    ConnectionManager, ConnectionOptions, Endpoint, EventDispatcher, RequestError, hash_password,
};
use solvr_protocol::{InboundEvent, OutboundCommand};
use tracing::debug;

use crate::forms::{self, FormError};

/// What the server made of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success(String),
    Rejected(String),
}

impl Outcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success(message) | Outcome::Rejected(message) => write!(f, "{message}"),
        }
    }
}

/// Fields of the registration form.
#[derive(Debug, Clone, Default)]
pub struct Registration {
    pub login: String,
    pub password: String,
    pub email: String,
    pub last_name: String,
    pub first_name: String,
    pub middle_name: String,
}

impl Registration {
    /// # Errors
    ///
    /// Returns the first field that fails its check.
    pub fn validate(&self) -> Result<(), FormError> {
        forms::validate_login(&self.login)?;
        forms::validate_password(&self.password)?;
        forms::validate_email(&self.email)?;
        forms::require(&self.last_name, "Last name")?;
        forms::require(&self.first_name, "First name")?;
        Ok(())
    }
}

pub struct Session {
    manager: ConnectionManager,
}

impl Session {
    /// Connect to `endpoint` with a fresh dispatcher.
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot be reached.
    pub async fn connect(endpoint: Endpoint, options: ConnectionOptions) -> Result<Self> {
        let manager = ConnectionManager::new(options, EventDispatcher::new());
        manager
            .connect(endpoint.clone())
            .await
            .with_context(|| format!("Could not connect to {endpoint}"))?;
        Ok(Self { manager })
    }

    #[must_use]
    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub async fn login(&self, login: &str, password: &str) -> Result<Outcome> {
        forms::validate_login(login)?;
        forms::require(password, "Password")?;

        let reply = self
            .manager
            .request(OutboundCommand::Login {
                login: login.to_string(),
                password_hash: hash_password(password),
            })
            .await
            .context("Login failed")?;

        Ok(match reply {
            InboundEvent::AuthOk => Outcome::Success(format!("Logged in as {login}")),
            InboundEvent::AuthError => {
                Outcome::Rejected("Login failed: wrong login or password".to_string())
            }
            other => unexpected(&other),
        })
    }

    pub async fn register(&self, form: &Registration) -> Result<Outcome> {
        form.validate()?;

        let reply = self
            .manager
            .request(OutboundCommand::Register {
                login: form.login.clone(),
                password_hash: hash_password(&form.password),
                email: form.email.clone(),
                last_name: form.last_name.trim().to_string(),
                first_name: form.first_name.trim().to_string(),
                middle_name: form.middle_name.trim().to_string(),
            })
            .await
            .context("Registration failed")?;

        Ok(match reply {
            InboundEvent::RegisterOk => {
                Outcome::Success(format!("Registered {}; you can now log in", form.login))
            }
            InboundEvent::RegisterError => Outcome::Rejected(
                "Registration failed: login or email is already taken".to_string(),
            ),
            other => unexpected(&other),
        })
    }

    /// Ask the server to mail a reset code.
    ///
    /// The server only ever answers with an error, so silence until the
    /// response timeout counts as acceptance.
    pub async fn request_reset(&self, email: &str) -> Result<Outcome> {
        forms::validate_email(email)?;

        let command = OutboundCommand::ResetRequestCode {
            email: email.to_string(),
        };
        self.reset_reply(command, format!("Reset code sent to {email}"))
            .await
    }

    pub async fn confirm_reset(&self, email: &str, code: &str, password: &str) -> Result<Outcome> {
        forms::validate_email(email)?;
        forms::require(code, "Reset code")?;
        forms::validate_password(password)?;

        let command = OutboundCommand::ResetConfirm {
            email: email.to_string(),
            code: code.trim().to_string(),
            password_hash: hash_password(password),
        };
        self.reset_reply(command, "Password changed".to_string())
            .await
    }

    async fn reset_reply(&self, command: OutboundCommand, accepted: String) -> Result<Outcome> {
        match self.manager.request(command).await {
            Ok(InboundEvent::ResetError) => Ok(Outcome::Rejected(
                "Password reset failed: unknown email or wrong code".to_string(),
            )),
            Ok(other) => Ok(unexpected(&other)),
            Err(RequestError::Timeout(waited)) => {
                debug!("No reset error within {:?}, assuming success", waited);
                Ok(Outcome::Success(accepted))
            }
            Err(e) => Err(e).context("Password reset failed"),
        }
    }

    pub async fn solve_linear(&self, a: &str, b: &str) -> Result<Outcome> {
        let (sign_a, a) = forms::parse_coefficient(a)?;
        let (sign_b, b) = forms::parse_coefficient(b)?;

        self.solve(OutboundCommand::SolveLinear {
            sign_a,
            a,
            sign_b,
            b,
        })
        .await
    }

    pub async fn solve_quadratic(&self, a: &str, b: &str, c: &str) -> Result<Outcome> {
        let (sign_a, a) = forms::parse_coefficient(a)?;
        let (sign_b, b) = forms::parse_coefficient(b)?;
        let (sign_c, c) = forms::parse_coefficient(c)?;

        self.solve(OutboundCommand::SolveQuadratic {
            sign_a,
            a,
            sign_b,
            b,
            sign_c,
            c,
        })
        .await
    }

    async fn solve(&self, command: OutboundCommand) -> Result<Outcome> {
        debug!("Solving {}", command);
        let reply = self
            .manager
            .request(command)
            .await
            .context("Equation request failed")?;
        Ok(describe_answer(&reply))
    }

    /// Disconnect and drop every subscription.
    pub async fn close(self) {
        self.manager.shutdown().await;
    }
}

fn describe_answer(reply: &InboundEvent) -> Outcome {
    match reply {
        InboundEvent::EquationOk { values } => {
            Outcome::Success(format!("Answer: {}", values.join(", ")))
        }
        InboundEvent::EquationFail { reason } => Outcome::Rejected(match reason.as_str() {
            "no_solution" => "No solution".to_string(),
            "infinity_solutions" => "Infinitely many solutions".to_string(),
            other => format!("Error: {other}"),
        }),
        other => unexpected(other),
    }
}

fn unexpected(reply: &InboundEvent) -> Outcome {
    Outcome::Rejected(format!("Unexpected reply from server: {reply}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration() -> Registration {
        Registration {
            login: "alice".to_string(),
            password: "Secr3t!".to_string(),
            email: "alice@example.com".to_string(),
            last_name: "Liddell".to_string(),
            first_name: "Alice".to_string(),
            middle_name: String::new(),
        }
    }

    #[test]
    fn test_registration_validate() {
        assert!(registration().validate().is_ok());

        let mut form = registration();
        form.first_name = " ".to_string();
        assert_eq!(form.validate(), Err(FormError::Empty("First name")));

        let mut form = registration();
        form.email = "alice".to_string();
        assert!(matches!(form.validate(), Err(FormError::InvalidEmail(_))));

        let mut form = registration();
        form.password = "weak".to_string();
        assert_eq!(form.validate(), Err(FormError::PasswordTooShort));
    }

    #[test]
    fn test_describe_answer() {
        let ok = describe_answer(&InboundEvent::EquationOk {
            values: vec!["1".to_string(), "-2".to_string()],
        });
        assert_eq!(ok, Outcome::Success("Answer: 1, -2".to_string()));

        let none = describe_answer(&InboundEvent::EquationFail {
            reason: "no_solution".to_string(),
        });
        assert_eq!(none.to_string(), "No solution");
        assert!(!none.is_success());

        let many = describe_answer(&InboundEvent::EquationFail {
            reason: "infinity_solutions".to_string(),
        });
        assert_eq!(many.to_string(), "Infinitely many solutions");

        let error = describe_answer(&InboundEvent::EquationFail {
            reason: "error".to_string(),
        });
        assert_eq!(error.to_string(), "Error: error");
    }

    #[test]
    fn test_unexpected_reply_is_rejected() {
        let outcome = describe_answer(&InboundEvent::AuthOk);
        assert!(!outcome.is_success());
        assert!(outcome.to_string().contains("auth ok"));
    }
}
