//! Agent backends.
//!
//! - [`CommandBackend`] shells out to a model CLI (claude, llm, ollama, ...).
//! - [`EchoBackend`] answers offline and deterministically; used by
//!   `agentgraph validate` and `run --backend echo`.
//! - [`ScriptedBackend`] is a programmable double for tests and demos.

mod command;
mod echo;
mod scripted;

pub use command::{CommandBackend, CommandProvider};
pub use echo::{EchoBackend, EchoProvider};
pub use scripted::{ScriptedBackend, ScriptedCall, ScriptedProvider};
