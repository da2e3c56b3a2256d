use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::TypeError;

/// Chains (and chain-bound assets) the bridge can move funds between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Chain {
    Xmr,
    Btc,
    Eth,
    Ton,
    Sol,
    Arb,
    Base,
    /// ERC-20 on Ethereum.
    Usdc,
    /// ERC-20 on Ethereum.
    Usdt,
}

impl Chain {
    pub const ALL: &'static [Chain] = &[
        Chain::Xmr,
        Chain::Btc,
        Chain::Eth,
        Chain::Ton,
        Chain::Sol,
        Chain::Arb,
        Chain::Base,
        Chain::Usdc,
        Chain::Usdt,
    ];

    /// Deposit confirmations required before a source transfer is final
    /// enough to act on.
    pub fn required_confirmations(&self) -> i32 {
        match self {
            Chain::Xmr => 10,
            Chain::Btc => 3,
            Chain::Eth => 12,
            Chain::Ton => 1,
            Chain::Sol => 32,
            Chain::Arb => 1,
            Chain::Base => 1,
            Chain::Usdc | Chain::Usdt => 12,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Xmr => "XMR",
            Chain::Btc => "BTC",
            Chain::Eth => "ETH",
            Chain::Ton => "TON",
            Chain::Sol => "SOL",
            Chain::Arb => "ARB",
            Chain::Base => "BASE",
            Chain::Usdc => "USDC",
            Chain::Usdt => "USDT",
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Chain {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "XMR" => Ok(Chain::Xmr),
            "BTC" => Ok(Chain::Btc),
            "ETH" => Ok(Chain::Eth),
            "TON" => Ok(Chain::Ton),
            "SOL" => Ok(Chain::Sol),
            "ARB" => Ok(Chain::Arb),
            "BASE" => Ok(Chain::Base),
            "USDC" => Ok(Chain::Usdc),
            "USDT" => Ok(Chain::Usdt),
            other => Err(TypeError::UnsupportedChain(other.to_string())),
        }
    }
}

/// A bridging direction: source chain/asset to destination chain/asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Direction {
    pub source: Chain,
    pub dest: Chain,
}

impl Direction {
    pub fn new(source: Chain, dest: Chain) -> Self {
        Self { source, dest }
    }

    /// Same-chain "bridging" is never a valid direction.
    pub fn is_supported(&self) -> bool {
        self.source != self.dest
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_TO_{}", self.source, self.dest)
    }
}
