use crate::database::Storage;
use crate::email::Mailer;
use crate::verification::VerificationWorkflow;

/// Shared router state: the repository, the mailer, and the passcode
/// workflow built on both.
#[derive(Clone)]
pub struct AppState<S, M> {
    pub storage: S,
    pub mailer: M,
    pub verification: VerificationWorkflow<S, M>,
}

impl<S, M> AppState<S, M>
where
    S: Storage,
    M: Mailer,
{
    pub fn new(storage: S, mailer: M, verification: VerificationWorkflow<S, M>) -> Self {
        Self {
            storage,
            mailer,
            verification,
        }
    }
}
