//! Stock parsers for SPL token program accounts.
//!
//! Each constructor hands out the same shared parser, so every key decoded
//! through e.g. [`mint_parser`] shows up together in `by_parser`.

use std::sync::OnceLock;

use solana_program::program_pack::Pack;
use solana_sdk::{account::Account, pubkey::Pubkey};
use spl_token::state::{Account as TokenAccount, Mint};

use crate::cache::{Parser, Undecoded};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenData {
    Mint(Mint),
    TokenAccount(TokenAccount),
    /// Layout unknown to these parsers; the raw bytes live on the entry.
    Raw,
}

impl TokenData {
    pub fn as_mint(&self) -> Option<&Mint> {
        match self {
            Self::Mint(mint) => Some(mint),
            _ => None,
        }
    }

    pub fn as_token_account(&self) -> Option<&TokenAccount> {
        match self {
            Self::TokenAccount(account) => Some(account),
            _ => None,
        }
    }
}

impl Undecoded for TokenData {
    fn undecoded(_pubkey: &Pubkey, _account: &Account) -> Self {
        Self::Raw
    }
}

fn is_token_program_account(account: &Account, len: usize) -> bool {
    account.owner == spl_token::id() && account.data.len() == len
}

fn decode_mint(account: &Account) -> Option<Mint> {
    if !is_token_program_account(account, Mint::LEN) {
        return None;
    }
    Mint::unpack(&account.data).ok()
}

fn decode_token_account(account: &Account) -> Option<TokenAccount> {
    if !is_token_program_account(account, TokenAccount::LEN) {
        return None;
    }
    TokenAccount::unpack(&account.data).ok()
}

/// Initialized SPL mints; anything else is rejected.
pub fn mint_parser() -> Parser<TokenData> {
    static PARSER: OnceLock<Parser<TokenData>> = OnceLock::new();
    PARSER
        .get_or_init(|| Parser::new("spl_mint", |_, account| decode_mint(account).map(TokenData::Mint)))
        .clone()
}

/// Initialized SPL token accounts; anything else is rejected.
pub fn token_account_parser() -> Parser<TokenData> {
    static PARSER: OnceLock<Parser<TokenData>> = OnceLock::new();
    PARSER
        .get_or_init(|| {
            Parser::new("spl_token_account", |_, account| {
                decode_token_account(account).map(TokenData::TokenAccount)
            })
        })
        .clone()
}

/// Lenient parser: token program layouts when they decode, `Raw` otherwise.
pub fn any_account_parser() -> Parser<TokenData> {
    static PARSER: OnceLock<Parser<TokenData>> = OnceLock::new();
    PARSER
        .get_or_init(|| {
            Parser::new("any_account", |_, account| {
                let data = decode_mint(account)
                    .map(TokenData::Mint)
                    .or_else(|| decode_token_account(account).map(TokenData::TokenAccount))
                    .unwrap_or(TokenData::Raw);
                Some(data)
            })
        })
        .clone()
}

#[cfg(test)]
mod tests {
    use solana_program::program_option::COption;
    use spl_token::state::AccountState;

    use super::*;

    fn mint_account(supply: u64) -> Account {
        let mint = Mint {
            mint_authority: COption::None,
            supply,
            decimals: 6,
            is_initialized: true,
            freeze_authority: COption::None,
        };
        let mut data = vec![0u8; Mint::LEN];
        Mint::pack(mint, &mut data).unwrap();
        Account {
            lamports: 1_461_600,
            data,
            owner: spl_token::id(),
            executable: false,
            rent_epoch: 0,
        }
    }

    fn token_account(mint: Pubkey, amount: u64) -> Account {
        let state = TokenAccount {
            mint,
            owner: Pubkey::new_unique(),
            amount,
            state: AccountState::Initialized,
            ..TokenAccount::default()
        };
        let mut data = vec![0u8; TokenAccount::LEN];
        TokenAccount::pack(state, &mut data).unwrap();
        Account {
            lamports: 2_039_280,
            data,
            owner: spl_token::id(),
            executable: false,
            rent_epoch: 0,
        }
    }

    #[test]
    fn mint_parser_decodes_only_mints() {
        let key = Pubkey::new_unique();
        let parsed = mint_parser().parse(&key, mint_account(1_000)).unwrap();
        assert_eq!(parsed.info.as_mint().unwrap().supply, 1_000);

        assert!(mint_parser().parse(&key, token_account(key, 5)).is_none());

        let mut foreign = mint_account(1);
        foreign.owner = Pubkey::new_unique();
        assert!(mint_parser().parse(&key, foreign).is_none());
    }

    #[test]
    fn token_account_parser_reads_amount() {
        let mint = Pubkey::new_unique();
        let parsed = token_account_parser()
            .parse(&Pubkey::new_unique(), token_account(mint, 42))
            .unwrap();
        let state = parsed.info.as_token_account().unwrap();
        assert_eq!(state.amount, 42);
        assert_eq!(state.mint, mint);
    }

    #[test]
    fn any_account_parser_falls_back_to_raw() {
        let key = Pubkey::new_unique();
        let system = Account {
            lamports: 5,
            ..Account::default()
        };
        assert_eq!(any_account_parser().parse(&key, system).unwrap().info, TokenData::Raw);
        assert!(matches!(
            any_account_parser().parse(&key, mint_account(3)).unwrap().info,
            TokenData::Mint(_)
        ));
    }

    #[test]
    fn constructors_share_identity() {
        assert!(mint_parser().same_as(&mint_parser()));
        assert!(!mint_parser().same_as(&token_account_parser()));
    }
}
