use std::fmt;
use std::str::FromStr;

use bitcoin::Network;
use bitcoin::address::{Address, NetworkUnchecked};
use serde::{Deserialize, Serialize};

use super::OrderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Chain {
    Bitcoin,
    BitcoinTestnet,
    BitcoinRegtest,
    Ethereum,
    EthereumSepolia,
    EthereumLocalnet,
}

impl Chain {
    pub fn as_str(self) -> &'static str {
        match self {
            Chain::Bitcoin => "bitcoin",
            Chain::BitcoinTestnet => "bitcoin_testnet",
            Chain::BitcoinRegtest => "bitcoin_regtest",
            Chain::Ethereum => "ethereum",
            Chain::EthereumSepolia => "ethereum_sepolia",
            Chain::EthereumLocalnet => "ethereum_localnet",
        }
    }

    /// Network for address validation; `None` for EVM chains.
    pub fn bitcoin_network(self) -> Option<Network> {
        match self {
            Chain::Bitcoin => Some(Network::Bitcoin),
            Chain::BitcoinTestnet => Some(Network::Testnet),
            Chain::BitcoinRegtest => Some(Network::Regtest),
            Chain::Ethereum | Chain::EthereumSepolia | Chain::EthereumLocalnet => None,
        }
    }

    pub fn is_evm(self) -> bool {
        self.bitcoin_network().is_none()
    }

    pub fn validate_address(self, address: &str) -> Result<(), OrderError> {
        match self.bitcoin_network() {
            Some(network) => {
                let unchecked: Address<NetworkUnchecked> = address.parse().map_err(|e| {
                    OrderError::Validation(format!("invalid {self} address {address}: {e}"))
                })?;
                unchecked.require_network(network).map_err(|e| {
                    OrderError::Validation(format!("invalid {self} address {address}: {e}"))
                })?;
                Ok(())
            }
            None => {
                if is_evm_address(address) {
                    Ok(())
                } else {
                    Err(OrderError::Validation(format!(
                        "invalid {self} address {address}"
                    )))
                }
            }
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Chain {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bitcoin" => Ok(Chain::Bitcoin),
            "bitcoin_testnet" => Ok(Chain::BitcoinTestnet),
            "bitcoin_regtest" => Ok(Chain::BitcoinRegtest),
            "ethereum" => Ok(Chain::Ethereum),
            "ethereum_sepolia" => Ok(Chain::EthereumSepolia),
            "ethereum_localnet" => Ok(Chain::EthereumLocalnet),
            other => Err(OrderError::Validation(format!("unknown chain: {other}"))),
        }
    }
}

/// Native coin of a chain, or an ERC-20 style token contract.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Asset {
    Primary,
    Token(String),
}

impl Asset {
    pub fn parse_for(chain: Chain, s: &str) -> Result<Self, OrderError> {
        if s.is_empty() || s == "primary" {
            return Ok(Asset::Primary);
        }
        if !chain.is_evm() {
            return Err(OrderError::Validation(format!(
                "{chain} only supports the primary asset, got {s}"
            )));
        }
        if !is_evm_address(s) {
            return Err(OrderError::Validation(format!(
                "invalid token contract {s}"
            )));
        }
        Ok(Asset::Token(s.to_ascii_lowercase()))
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Asset::Primary => f.write_str("primary"),
            Asset::Token(contract) => f.write_str(contract),
        }
    }
}

impl Serialize for Asset {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Asset {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s == "primary" {
            return Ok(Asset::Primary);
        }
        if is_evm_address(&s) {
            return Ok(Asset::Token(s.to_ascii_lowercase()));
        }
        Err(serde::de::Error::custom(format!("invalid asset: {s}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Leg {
    pub chain: Chain,
    pub asset: Asset,
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chain, self.asset)
    }
}

impl FromStr for Leg {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (chain, asset) = match s.split_once(':') {
            Some((chain, asset)) => (chain, asset),
            None => (s, ""),
        };
        let chain: Chain = chain.parse()?;
        let asset = Asset::parse_for(chain, asset)?;
        Ok(Leg { chain, asset })
    }
}

/// `<chain>:<asset>-<chain>:<asset>`. The first leg is what the maker sends.
/// A missing asset means the chain's primary asset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderPair {
    pub send: Leg,
    pub receive: Leg,
}

impl OrderPair {
    pub fn canonical(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for OrderPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.send, self.receive)
    }
}

impl FromStr for OrderPair {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (send, receive) = s
            .split_once('-')
            .ok_or_else(|| OrderError::Validation(format!("invalid order pair: {s}")))?;
        let send: Leg = send.parse()?;
        let receive: Leg = receive.parse()?;
        if send.chain == receive.chain {
            return Err(OrderError::Validation(format!(
                "order pair must span two chains: {s}"
            )));
        }
        Ok(OrderPair { send, receive })
    }
}

pub fn is_evm_address(s: &str) -> bool {
    s.strip_prefix("0x")
        .is_some_and(|hex| hex.len() == 40 && hex.chars().all(|c| c.is_ascii_hexdigit()))
}
