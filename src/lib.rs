//! `cosmos-proxy` library crate: every module the binary wires together,
//! exposed so integration tests can drive the proxy end to end (build an
//! `AppState`, mount `proxy::router`, and hit it with a real HTTP client)
//! rather than only unit-testing pieces in isolation. Mirrors the teacher's
//! own `lib`+`bin` split, where the binary is a thin entrypoint over a
//! library crate of the same modules.

pub mod accumulator;
pub mod cli;
pub mod control_link;
pub mod correlator;
pub mod decode;
pub mod error;
pub mod fanout;
pub mod history;
pub mod logging;
pub mod ordering_gate;
pub mod pending_tools;
pub mod proxy;
pub mod sse;
pub mod supervisor;
