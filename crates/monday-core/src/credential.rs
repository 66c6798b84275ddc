//! Wallet seed material.

use bip39::Mnemonic;

use crate::{Error, Result};

/// A BIP-39 mnemonic with its optional passphrase.
///
/// The phrase never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    mnemonic: Mnemonic,
    passphrase: Option<String>,
}

impl Credential {
    /// Wrap an already validated mnemonic.
    pub const fn new(mnemonic: Mnemonic, passphrase: Option<String>) -> Self {
        Self {
            mnemonic,
            passphrase,
        }
    }

    /// Parse an English mnemonic phrase.
    pub fn parse(phrase: &str, passphrase: Option<String>) -> Result<Self> {
        let mnemonic = Mnemonic::parse(phrase)
            .map_err(|e| Error::InvalidArgument(format!("invalid mnemonic: {e}")))?;
        Ok(Self::new(mnemonic, passphrase))
    }

    /// The mnemonic.
    pub const fn mnemonic(&self) -> &Mnemonic {
        &self.mnemonic
    }

    /// Space separated mnemonic words.
    pub fn phrase(&self) -> String {
        self.mnemonic.to_string()
    }

    /// The optional BIP-39 passphrase.
    pub fn passphrase(&self) -> Option<&str> {
        self.passphrase.as_deref()
    }

    /// Number of words in the mnemonic.
    pub fn word_count(&self) -> usize {
        self.mnemonic.word_count()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("words", &self.word_count())
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
