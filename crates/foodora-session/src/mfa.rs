//! MFA challenge state machine
//!
//! Pure state machine: receives events, returns (new_state, action).
//! The orchestrator executes the I/O implied by each action (persisting the
//! challenge, prompting, resubmitting the grant).
//!
//! ```text
//! NoChallenge --ChallengeIssued--> Triggered --CodeEntered------> Resolved
//!                                      |     --PromptUnavailable-> Abandoned
//!                                      |     --DeadlineElapsed---> TimedOut
//! Resolved --ChallengeIssued--> Triggered (rotated challenge)
//! any --TokenIssued--> NoChallenge
//! ```

use foodora_auth::{DEFAULT_OTP_METHOD, MfaChallenge, SessionRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeState {
    NoChallenge,
    /// Waiting for a code.
    Triggered { challenge: MfaChallenge },
    /// Code entered, grant being resubmitted.
    Resolved { challenge: MfaChallenge },
    /// Nobody can answer now; the challenge stays persisted for a later run.
    Abandoned { challenge: MfaChallenge },
    TimedOut { channel: String },
}

impl ChallengeState {
    pub fn label(&self) -> &'static str {
        match self {
            ChallengeState::NoChallenge => "no_challenge",
            ChallengeState::Triggered { .. } => "triggered",
            ChallengeState::Resolved { .. } => "resolved",
            ChallengeState::Abandoned { .. } => "abandoned",
            ChallengeState::TimedOut { .. } => "timed_out",
        }
    }
}

#[derive(Debug, Clone)]
pub enum ChallengeEvent {
    /// Token endpoint answered `mfa_triggered`.
    ChallengeIssued(MfaChallenge),
    CodeEntered(String),
    /// No interactive prompt, or the caller chose not to wait.
    PromptUnavailable,
    DeadlineElapsed,
    TokenIssued,
}

/// Actions the caller should execute after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeAction {
    /// Store the challenge on the session record.
    PersistChallenge(MfaChallenge),
    /// Ask again; the last code was blank.
    PromptForCode { channel: String },
    /// Resend the password grant with the code.
    Resubmit {
        mfa_token: String,
        otp_method: String,
        otp_code: String,
    },
    /// Tell the user how to finish later.
    ReportDeferred(MfaChallenge),
    FailTimeout { channel: String },
    /// Drop the stored challenge.
    ClearChallenge,
    None,
}

/// Handle a state transition. Pure function: no I/O.
pub fn handle_event(state: ChallengeState, event: ChallengeEvent) -> (ChallengeState, ChallengeAction) {
    match (state, event) {
        (_, ChallengeEvent::TokenIssued) => {
            (ChallengeState::NoChallenge, ChallengeAction::ClearChallenge)
        }

        (
            ChallengeState::NoChallenge
            | ChallengeState::Triggered { .. }
            | ChallengeState::Resolved { .. },
            ChallengeEvent::ChallengeIssued(challenge),
        ) => (
            ChallengeState::Triggered {
                challenge: challenge.clone(),
            },
            ChallengeAction::PersistChallenge(challenge),
        ),

        (ChallengeState::Triggered { challenge }, ChallengeEvent::CodeEntered(code)) => {
            let code = code.trim();
            if code.is_empty() {
                let channel = challenge.channel.clone();
                return (
                    ChallengeState::Triggered { challenge },
                    ChallengeAction::PromptForCode { channel },
                );
            }
            let action = ChallengeAction::Resubmit {
                mfa_token: challenge.mfa_token.clone(),
                otp_method: otp_method_for(&challenge.channel),
                otp_code: code.to_string(),
            };
            (ChallengeState::Resolved { challenge }, action)
        }

        (ChallengeState::Triggered { challenge }, ChallengeEvent::PromptUnavailable) => (
            ChallengeState::Abandoned {
                challenge: challenge.clone(),
            },
            ChallengeAction::ReportDeferred(challenge),
        ),

        (ChallengeState::Triggered { challenge }, ChallengeEvent::DeadlineElapsed) => {
            let channel = challenge.channel;
            (
                ChallengeState::TimedOut {
                    channel: channel.clone(),
                },
                ChallengeAction::FailTimeout { channel },
            )
        }

        // Everything else is ignored.
        (state, _event) => (state, ChallengeAction::None),
    }
}

fn otp_method_for(channel: &str) -> String {
    match channel.trim() {
        "" => DEFAULT_OTP_METHOD.to_string(),
        channel => channel.to_string(),
    }
}

/// What a new login attempt picks up from a stored challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumedChallenge {
    pub mfa_token: Option<String>,
    pub otp_method: String,
}

/// Reuse the stored challenge when it was issued for `email`.
///
/// The stored channel is kept unless the caller chose one explicitly.
pub fn resume_pending(
    record: &SessionRecord,
    email: &str,
    explicit_channel: Option<&str>,
) -> ResumedChallenge {
    let explicit_channel = explicit_channel.map(str::trim).filter(|c| !c.is_empty());
    let pending = record
        .pending_challenge
        .as_ref()
        .filter(|p| p.email.trim().eq_ignore_ascii_case(email.trim()));

    let mfa_token = pending
        .map(|p| p.mfa_token.trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string);
    let otp_method = explicit_channel
        .or_else(|| {
            pending
                .map(|p| p.channel.trim())
                .filter(|c| !c.is_empty())
        })
        .unwrap_or(DEFAULT_OTP_METHOD)
        .to_string();

    ResumedChallenge {
        mfa_token,
        otp_method,
    }
}
