use anchor_lang::prelude::*;

/// Custom error codes this client assumes the lottery program raises.
/// Declaration order fixes the numeric codes (from 6000) and has to match the
/// deployed program.
#[error_code]
pub enum LotteryErrorCode {
    #[msg("Lottery is not open")]
    LotteryNotOpen,
    #[msg("Not authorized")]
    NotAuthorized,
    #[msg("Lottery is not completed")]
    LotteryNotCompleted,
    #[msg("Winner already chosen")]
    WinnerChosen,
    #[msg("Incorrect randomness account")]
    IncorrectRandomnessAccount,
    #[msg("Randomness already revealed")]
    RandomnessAlreadyRevealed,
    #[msg("Randomness not resolved")]
    RandomnessNotResolved,
    #[msg("Winner not chosen")]
    WinnerNotChosen,
    #[msg("Round does not match the current round")]
    RoundMismatch,
    #[msg("Payment does not match the ticket price")]
    IncorrectTicketPrice,
}

impl LotteryErrorCode {
    const ALL: [LotteryErrorCode; 10] = [
        LotteryErrorCode::LotteryNotOpen,
        LotteryErrorCode::NotAuthorized,
        LotteryErrorCode::LotteryNotCompleted,
        LotteryErrorCode::WinnerChosen,
        LotteryErrorCode::IncorrectRandomnessAccount,
        LotteryErrorCode::RandomnessAlreadyRevealed,
        LotteryErrorCode::RandomnessNotResolved,
        LotteryErrorCode::WinnerNotChosen,
        LotteryErrorCode::RoundMismatch,
        LotteryErrorCode::IncorrectTicketPrice,
    ];

    /// Maps a custom program error code back to its variant.
    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|e| u32::from(*e) == code)
    }
}
