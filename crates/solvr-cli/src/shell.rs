//! Interactive session that keeps one connection open.

use std::borrow::Cow;

use anyhow::{Result, bail};
use rustyline::completion::Completer;
use rustyline::error::ReadlineError;
use rustyline::highlight::{CmdKind, Highlighter};
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::Validator;
use rustyline::{ColorMode, Config, DefaultEditor, Editor, Helper};
use solvr_client::ConnectionState;

use crate::forms;
use crate::session::{Registration, Session};

const PROMPT: &str = "solvr> ";

const HELP: &str = "\
Commands:
  login <LOGIN>                              Log in (prompts for password)
  register <LOGIN> <EMAIL> <LAST> <FIRST> [MIDDLE]
                                             Create an account (prompts for password)
  reset <EMAIL>                              Request a reset code, then set a new password
  linear <A> <B>                             Solve A*x + B = 0
  quadratic <A> <B> <C>                      Solve A*x^2 + B*x + C = 0
  status                                     Show connection state
  help                                       Show this help
  quit                                       Disconnect and exit";

#[derive(Debug, Clone, PartialEq, Eq)]
enum ShellCommand {
    Empty,
    Login {
        login: String,
    },
    Register {
        login: String,
        email: String,
        last_name: String,
        first_name: String,
        middle_name: String,
    },
    Reset {
        email: String,
    },
    Linear {
        a: String,
        b: String,
    },
    Quadratic {
        a: String,
        b: String,
        c: String,
    },
    Status,
    Help,
    Quit,
}

fn parse(line: &str) -> Result<ShellCommand, String> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some((&verb, args)) = words.split_first() else {
        return Ok(ShellCommand::Empty);
    };
    let owned = |i: usize| args[i].to_string();

    let command = match (verb, args.len()) {
        ("login", 1) => ShellCommand::Login { login: owned(0) },
        ("register", 4 | 5) => ShellCommand::Register {
            login: owned(0),
            email: owned(1),
            last_name: owned(2),
            first_name: owned(3),
            middle_name: args.get(4).map(ToString::to_string).unwrap_or_default(),
        },
        ("reset", 1) => ShellCommand::Reset { email: owned(0) },
        ("linear", 2) => ShellCommand::Linear {
            a: owned(0),
            b: owned(1),
        },
        ("quadratic", 3) => ShellCommand::Quadratic {
            a: owned(0),
            b: owned(1),
            c: owned(2),
        },
        ("status", 0) => ShellCommand::Status,
        ("help" | "?", 0) => ShellCommand::Help,
        ("quit" | "exit", 0) => ShellCommand::Quit,
        ("login" | "register" | "reset" | "linear" | "quadratic" | "status" | "help" | "quit", _) => {
            return Err(format!("Wrong number of arguments for '{verb}'. Type 'help'."));
        }
        _ => return Err(format!("Unknown command '{verb}'. Type 'help'.")),
    };

    Ok(command)
}

/// Shows one `*` per typed character instead of the input.
struct PasswordMask;

impl Highlighter for PasswordMask {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        Cow::Owned("*".repeat(line.chars().count()))
    }

    fn highlight_char(&self, _line: &str, _pos: usize, _kind: CmdKind) -> bool {
        true
    }
}

impl Completer for PasswordMask {
    type Candidate = String;
}

impl Hinter for PasswordMask {
    type Hint = String;
}

impl Validator for PasswordMask {}

impl Helper for PasswordMask {}

/// Read one line, `None` on Ctrl-C or Ctrl-D.
fn read_line<H: Helper>(
    editor: &mut Editor<H, DefaultHistory>,
    prompt: &str,
) -> Result<Option<String>> {
    match tokio::task::block_in_place(|| editor.readline(prompt)) {
        Ok(line) => Ok(Some(line)),
        Err(ReadlineError::Interrupted | ReadlineError::Eof) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Password from `SOLVR_PASSWORD`, or typed at the terminal with masked echo.
pub fn read_password(prompt: &str) -> Result<String> {
    if let Ok(password) = std::env::var("SOLVR_PASSWORD") {
        return Ok(password);
    }

    // Forced color mode keeps the mask on even when the terminal reports no color support.
    let config = Config::builder()
        .auto_add_history(false)
        .color_mode(ColorMode::Forced)
        .build();
    let mut editor: Editor<PasswordMask, DefaultHistory> = Editor::with_config(config)?;
    editor.set_helper(Some(PasswordMask));

    match read_line(&mut editor, prompt)? {
        Some(password) => Ok(password),
        None => bail!("No password entered"),
    }
}

pub async fn run(session: Session) -> Result<()> {
    let mut editor = DefaultEditor::new()?;

    if let Some(endpoint) = session.manager().endpoint() {
        println!("Connected to {endpoint}. Type 'help' for commands.");
    }

    while let Some(line) = read_line(&mut editor, PROMPT)? {
        if !line.trim().is_empty() {
            let _ = editor.add_history_entry(line.as_str());
        }

        let command = match parse(&line) {
            Ok(ShellCommand::Quit) => break,
            Ok(command) => command,
            Err(message) => {
                eprintln!("{message}");
                continue;
            }
        };

        if let Err(e) = execute(&session, &mut editor, command).await {
            eprintln!("Error: {e:#}");
        }

        if session.manager().state() == ConnectionState::Disconnected {
            eprintln!("Connection to the server was lost");
            break;
        }
    }

    session.close().await;
    Ok(())
}

async fn execute(
    session: &Session,
    editor: &mut DefaultEditor,
    command: ShellCommand,
) -> Result<()> {
    let outcome = match command {
        ShellCommand::Empty | ShellCommand::Quit => return Ok(()),
        ShellCommand::Help => {
            println!("{HELP}");
            return Ok(());
        }
        ShellCommand::Status => {
            let manager = session.manager();
            match manager.endpoint() {
                Some(endpoint) => println!("{} ({endpoint})", manager.state()),
                None => println!("{}", manager.state()),
            }
            return Ok(());
        }
        ShellCommand::Login { login } => {
            let password = read_password("Password: ")?;
            session.login(&login, &password).await?
        }
        ShellCommand::Register {
            login,
            email,
            last_name,
            first_name,
            middle_name,
        } => {
            let mut password = read_password("Password (empty to generate): ")?;
            if password.is_empty() {
                password = forms::generate_password();
                println!("Generated password: {password}");
            }
            let form = Registration {
                login,
                password,
                email,
                last_name,
                first_name,
                middle_name,
            };
            session.register(&form).await?
        }
        ShellCommand::Reset { email } => {
            let requested = session.request_reset(&email).await?;
            println!("{requested}");
            if !requested.is_success() {
                return Ok(());
            }

            let Some(code) = read_line(editor, "Reset code: ")? else {
                return Ok(());
            };
            let password = read_password("New password: ")?;
            session.confirm_reset(&email, &code, &password).await?
        }
        ShellCommand::Linear { a, b } => session.solve_linear(&a, &b).await?,
        ShellCommand::Quadratic { a, b, c } => session.solve_quadratic(&a, &b, &c).await?,
    };

    println!("{outcome}");
    Ok(())
}
