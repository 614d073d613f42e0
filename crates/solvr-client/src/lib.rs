//! Client side of the solvr equation service.
//!
//! A [`ConnectionManager`] owns the one TCP connection to the server and
//! publishes every decoded server message through an [`EventDispatcher`].
//! Front ends create both at startup, subscribe the contexts that care about
//! replies, and call [`ConnectionManager::shutdown`] once before exiting.
//!
//! ```no_run
//! use solvr_client::{ConnectionManager, ConnectionOptions, Endpoint, EventDispatcher};
//! use solvr_protocol::{EventKind, OutboundCommand};
//!
//! # async fn run() -> solvr_client::Result<()> {
//! let dispatcher = EventDispatcher::new();
//! let _auth = dispatcher.subscribe(EventKind::AuthError, |_| eprintln!("login rejected"));
//!
//! let manager = ConnectionManager::new(ConnectionOptions::default(), dispatcher);
//! manager.connect(Endpoint::default()).await?;
//! let reply = manager
//!     .request(OutboundCommand::Login {
//!         login: "alice".to_string(),
//!         password_hash: solvr_client::hash_password("Secr3t!"),
//!     })
//!     .await?;
//! println!("{reply}");
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod credentials;
pub mod dispatcher;

mod error;

pub use connection::{ConnectionManager, ConnectionOptions, ConnectionState, Endpoint};
pub use credentials::hash_password;
pub use dispatcher::{EventDispatcher, EventStream, Handler, Subscription, SubscriptionId};
pub use error::{ConfigError, ConnectError, Error, RequestError, Result, SendError};
