//! OTP prompt capability
//!
//! The orchestrator never touches a terminal. Interactive code entry is an
//! injected [`OtpPrompt`]; [`NoPrompt`] makes every challenge deferred.

use std::future::Future;
use std::pin::Pin;

use tokio::time::Instant;
use tracing::debug;

use crate::cancel::CancelSignal;
use crate::error::{Error, Result};

pub trait OtpPrompt: Send + Sync {
    /// False when nobody can answer (no TTY, scripted run).
    fn is_interactive(&self) -> bool;

    /// Ask for the code sent via `channel`. May return a blank line.
    fn read_code<'a>(
        &'a self,
        channel: &'a str,
    ) -> Pin<Box<dyn Future<Output = std::io::Result<String>> + Send + 'a>>;
}

/// Prompt for non-interactive runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPrompt;

impl OtpPrompt for NoPrompt {
    fn is_interactive(&self) -> bool {
        false
    }

    fn read_code<'a>(
        &'a self,
        _channel: &'a str,
    ) -> Pin<Box<dyn Future<Output = std::io::Result<String>> + Send + 'a>> {
        Box::pin(async {
            Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "no interactive prompt available",
            ))
        })
    }
}

/// Read a non-blank code before `deadline`.
///
/// Cancellation beats the deadline, which beats a code arriving at the same
/// instant.
pub async fn wait_for_code(
    prompt: &dyn OtpPrompt,
    channel: &str,
    deadline: Instant,
    cancel: &CancelSignal,
) -> Result<String> {
    loop {
        let code = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled(cancel.reason())),
            _ = tokio::time::sleep_until(deadline) => {
                return Err(Error::OtpTimeout { channel: channel.to_string() });
            }
            code = prompt.read_code(channel) => code?,
        };

        let code = code.trim();
        if !code.is_empty() {
            return Ok(code.to_string());
        }
        debug!(channel, "blank OTP code, prompting again");
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Interactive prompt answering from a script. Once the script runs out
    /// the prompt never answers.
    pub struct ScriptedPrompt {
        codes: Mutex<VecDeque<String>>,
        asked: AtomicUsize,
    }

    impl ScriptedPrompt {
        pub fn new(codes: &[&str]) -> Self {
            Self {
                codes: Mutex::new(codes.iter().map(|c| c.to_string()).collect()),
                asked: AtomicUsize::new(0),
            }
        }

        pub fn asked(&self) -> usize {
            self.asked.load(Ordering::SeqCst)
        }
    }

    impl OtpPrompt for ScriptedPrompt {
        fn is_interactive(&self) -> bool {
            true
        }

        fn read_code<'a>(
            &'a self,
            _channel: &'a str,
        ) -> Pin<Box<dyn Future<Output = std::io::Result<String>> + Send + 'a>> {
            self.asked.fetch_add(1, Ordering::SeqCst);
            let next = self.codes.lock().unwrap().pop_front();
            Box::pin(async move {
                match next {
                    Some(code) => Ok(code),
                    None => std::future::pending().await,
                }
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::ScriptedPrompt;
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn blank_codes_prompt_again() {
        let prompt = ScriptedPrompt::new(&["", "   ", " 123456\n"]);
        let deadline = Instant::now() + Duration::from_secs(600);
        let code = wait_for_code(&prompt, "sms", deadline, &CancelSignal::new())
            .await
            .unwrap();
        assert_eq!(code, "123456");
        assert_eq!(prompt.asked(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_elapses_without_code() {
        let prompt = ScriptedPrompt::new(&[]);
        let deadline = Instant::now() + Duration::from_secs(600);
        let err = wait_for_code(&prompt, "email", deadline, &CancelSignal::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::OtpTimeout { ref channel } if channel == "email"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_beats_elapsed_deadline() {
        let prompt = ScriptedPrompt::new(&[]);
        let cancel = CancelSignal::new();
        cancel.cancel("interrupted");
        let deadline = Instant::now();
        let err = wait_for_code(&prompt, "sms", deadline, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled(ref r) if r == "interrupted"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_wait_surfaces_reason() {
        let prompt = ScriptedPrompt::new(&[]);
        let cancel = CancelSignal::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel("interrupted");
        });

        let deadline = Instant::now() + Duration::from_secs(600);
        let err = wait_for_code(&prompt, "sms", deadline, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled(ref r) if r == "interrupted"));
    }

    #[tokio::test]
    async fn no_prompt_is_not_interactive() {
        assert!(!NoPrompt.is_interactive());
        let deadline = Instant::now() + Duration::from_secs(5);
        let err = wait_for_code(&NoPrompt, "sms", deadline, &CancelSignal::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Prompt(_)));
    }
}
