//! Binary entrypoint for the terminal chat client.

use std::process::ExitCode;

use medlife_chat::start_medlife_chat;

/// Load the session for the configured identity and run the chat loop.
fn main() -> ExitCode {
    start_medlife_chat::run()
}
