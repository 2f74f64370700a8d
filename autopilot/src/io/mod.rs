//! Side-effecting adapters: files, processes, HTTP and prompt rendering.

pub mod atomic;
pub mod config;
pub mod documents;
pub mod gemini;
pub mod init;
pub mod model;
pub mod process;
pub mod prompt;
pub mod retrieval;
pub mod transcript_log;
