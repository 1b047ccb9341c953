use crate::AppError;

/// Domain errors surfaced synchronously to callers.
///
/// Every variant except `Internal` is a caller input error and is never retried
/// automatically. `Internal` wraps storage or invariant faults; callers may retry
/// those with the same idempotency key.
#[derive(Debug)]
pub enum Error {
    InvalidToken,
    InvalidPin,
    EvidenceRequired(String),
    Forbidden,
    NotFound(String),
    OddWinnerCount(usize),
    EmptyWinnerSet,
    UnconfirmedWinner(String),
    DuplicateWinner(String),
    DuplicateEntrant(String),
    InvalidEntrantCount(usize),
    SeedCountMismatch { winners: usize, seeds: usize },
    DuplicateOperation,
    RevertWindowExpired,
    AlreadyInProgress(String),
    Internal(AppError),
}

impl Error {
    /// The machine-readable kind reported to callers alongside the human-readable
    /// reason.
    pub fn kind(&self) -> &'static str {
        use Error::*;
        match self {
            InvalidToken => "InvalidToken",
            InvalidPin => "InvalidPin",
            EvidenceRequired(_) => "EvidenceRequired",
            Forbidden => "Forbidden",
            NotFound(_) => "NotFound",
            OddWinnerCount(_) => "OddWinnerCount",
            EmptyWinnerSet => "EmptyWinnerSet",
            UnconfirmedWinner(_) => "UnconfirmedWinner",
            DuplicateWinner(_) => "DuplicateWinner",
            DuplicateEntrant(_) => "DuplicateEntrant",
            InvalidEntrantCount(_) => "InvalidEntrantCount",
            SeedCountMismatch { .. } => "SeedCountMismatch",
            DuplicateOperation => "DuplicateOperation",
            RevertWindowExpired => "RevertWindowExpired",
            AlreadyInProgress(_) => "AlreadyInProgress",
            Internal(_) => "Internal",
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use Error::*;
        match self {
            InvalidToken => write!(f, "The match token does not match."),
            InvalidPin => write!(f, "The match pin does not match."),
            EvidenceRequired(reason) => write!(f, "Evidence check failed: {}.", reason),
            Forbidden => write!(f, "This operation requires the admin capability."),
            NotFound(what) => write!(f, "{} was not found.", what),
            OddWinnerCount(n) => write!(f, "Cannot pair an odd number of winners ({}).", n),
            EmptyWinnerSet => write!(f, "No winners were supplied."),
            UnconfirmedWinner(id) => {
                write!(f, "Player {} did not win a confirmed match this round.", id)
            }
            DuplicateWinner(id) => write!(f, "Player {} appears more than once.", id),
            DuplicateEntrant(id) => write!(f, "Entrant {} appears more than once.", id),
            InvalidEntrantCount(n) => {
                write!(f, "A bracket needs exactly 16 entrants, got {}.", n)
            }
            SeedCountMismatch { winners, seeds } => write!(
                f,
                "The seed override has {} entries for {} winners.",
                seeds, winners
            ),
            DuplicateOperation => {
                write!(f, "A live advance operation already exists for this round.")
            }
            RevertWindowExpired => write!(f, "The revert window for this operation has expired."),
            AlreadyInProgress(id) => {
                write!(f, "Match {} already has reported results.", id)
            }
            Internal(e) => write!(f, "Internal error: {}.", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Internal(e) => e.source(),
            _ => None,
        }
    }
}

impl From<AppError> for Error {
    fn from(e: AppError) -> Self {
        Error::Internal(e)
    }
}
