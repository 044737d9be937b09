pub mod cli;
pub mod config;
pub mod controller;
pub mod error;
pub mod providers;
pub mod selector;
pub mod terminal;
pub mod transport;
pub mod web;

pub use controller::{
    ChatController, ChatUi, CycleOutcome, IndicatorHandle, Phase, Role, Session,
    SessionSnapshot, SessionState, Turn, TurnHandle,
};
pub use error::ChatError;
pub use providers::Backend;
pub use selector::{BackendChanged, BackendSelector};
pub use transport::{StreamOpener, TokenStream, Transport, Transports};
