//! Password-prompt collaborator: `prompt_password(prompt_text) ->
//! string`, invoked by the client when handling `password_required`.

use crate::error::{SessionError, SessionResult};

pub trait PasswordIo: Send + Sync {
    fn prompt_password(&self, prompt_text: &str) -> SessionResult<String>;
}

/// Default implementation: reads from the controlling terminal with echo
/// suppressed. Masking the input as it's typed is presentation, not session
/// logic, so this collaborator doesn't attempt it beyond what `rpassword`
/// gives for free.
pub struct StdinPasswordIo;

impl PasswordIo for StdinPasswordIo {
    fn prompt_password(&self, prompt_text: &str) -> SessionResult<String> {
        rpassword::prompt_password(format!("{prompt_text}: "))
            .map_err(|e| SessionError::Transport(e.to_string()))
    }
}
