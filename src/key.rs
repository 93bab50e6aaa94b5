//! Key codec: IP networks as bit strings in one 128-bit space.
//!
//! IPv4 networks are stored as IPv4-mapped IPv6 networks (`::ffff:a.b.c.d`),
//! so a `/24` IPv4 network becomes a 120-bit key. Bit `0` is the most
//! significant bit of the address.

use std::borrow::Cow;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use ipnet::{IpNet, Ipv4Net, Ipv6Net};

use crate::error::{Error, Result};

/// Width of every key, in bits.
pub const KEY_BITS: u8 = 128;

/// Length of the fixed `::ffff:0:0/96` pattern that carries IPv4 addresses.
const V4_MAPPED_BITS: u8 = 96;

/// Upper 96 bits of an IPv4-mapped address, shifted down by 32.
const V4_MAPPED_PATTERN: u128 = 0xffff;

// =============================================================================
// Bit utilities
// =============================================================================

/// Bit `idx` of `key`, where `0` is the MSB.
#[inline]
pub(crate) fn bit_at(key: u128, idx: u8) -> usize {
    debug_assert!(idx < KEY_BITS);
    ((key >> (KEY_BITS - 1 - idx)) & 1) as usize
}

/// Keep the leading `len` bits of `key`, clear the rest.
#[inline]
pub(crate) fn mask(key: u128, len: u8) -> u128 {
    debug_assert!(len <= KEY_BITS);
    if len == 0 {
        0
    } else {
        key & (u128::MAX << (KEY_BITS - len))
    }
}

/// Position of the first bit in `from..to` where `a` and `b` differ, or `to`
/// if they agree on the whole range.
#[inline]
pub(crate) fn first_difference(a: u128, b: u128, from: u8, to: u8) -> u8 {
    debug_assert!(from <= to && to <= KEY_BITS);
    if from == to {
        return to;
    }
    let same = ((a ^ b) << from).leading_zeros() as u8;
    from + same.min(to - from)
}

#[inline]
pub(crate) fn is_ipv4_mapped(key: u128) -> bool {
    key >> 32 == V4_MAPPED_PATTERN
}

fn addr_bits(addr: IpAddr) -> u128 {
    match addr {
        IpAddr::V4(v4) => u128::from(v4.to_ipv6_mapped()),
        IpAddr::V6(v6) => u128::from(v6),
    }
}

/// Parse a single address into its full 128-bit key.
pub fn parse_addr(input: &str) -> Result<u128> {
    IpAddr::from_str(input)
        .map(addr_bits)
        .map_err(|_| Error::InvalidAddress(input.to_owned()))
}

// =============================================================================
// Prefix
// =============================================================================

/// A network prefix in the unified key space.
///
/// Bits past `len` are always zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Prefix {
    bits: u128,
    len: u8,
}

impl Prefix {
    /// Build a prefix from raw key bits. Host bits are cleared.
    ///
    /// Fails when `len` is zero or wider than the key space.
    pub fn new(bits: u128, len: u8) -> Result<Self> {
        if len == 0 || len > KEY_BITS {
            return Err(Error::invalid_prefix(
                &format!("{bits:#x}/{len}"),
                "prefix length must be within 1..=128",
            ));
        }
        Ok(Self {
            bits: mask(bits, len),
            len,
        })
    }

    /// Parse `address[/len]`.
    ///
    /// Without a length the prefix is host-specific: `/32` for IPv4, `/128`
    /// for IPv6.
    pub fn parse(input: &str) -> Result<Self> {
        let cidr: Cow<'_, str> = if input.contains('/') {
            Cow::Borrowed(input)
        } else if input.contains(':') {
            Cow::Owned(format!("{input}/128"))
        } else {
            Cow::Owned(format!("{input}/32"))
        };
        let net = IpNet::from_str(&cidr).map_err(|e| Error::invalid_prefix(input, e))?;
        Self::from_net_for(net, input)
    }

    /// Convert a typed network. Zero-length networks are rejected.
    pub fn from_net(net: IpNet) -> Result<Self> {
        Self::from_net_for(net, &net.to_string())
    }

    fn from_net_for(net: IpNet, input: &str) -> Result<Self> {
        if net.prefix_len() == 0 {
            return Err(Error::invalid_prefix(input, "zero-length prefix"));
        }
        let len = match net {
            IpNet::V4(v4) => v4.prefix_len() + V4_MAPPED_BITS,
            IpNet::V6(v6) => v6.prefix_len(),
        };
        Ok(Self {
            bits: mask(addr_bits(net.addr()), len),
            len,
        })
    }

    /// Host prefix covering exactly `addr`.
    pub fn host(addr: IpAddr) -> Self {
        Self {
            bits: addr_bits(addr),
            len: KEY_BITS,
        }
    }

    #[inline]
    pub fn bits(&self) -> u128 {
        self.bits
    }

    /// Length in the 128-bit key space (IPv4 lengths are offset by 96).
    #[inline]
    pub fn prefix_len(&self) -> u8 {
        self.len
    }

    /// Whether `addr` (a full key) falls inside this prefix.
    #[inline]
    pub fn contains(&self, addr: u128) -> bool {
        mask(addr, self.len) == self.bits
    }

    /// Render back to a typed network.
    ///
    /// IPv4-mapped keys render as IPv4 with the length reduced by 96, so
    /// `::ffff:0:0/96` renders as `0.0.0.0/0`.
    pub fn to_net(&self) -> IpNet {
        render(self.bits, self.len)
    }
}

/// Render key bits of length `len` as a network.
pub(crate) fn render(bits: u128, len: u8) -> IpNet {
    debug_assert!(len <= KEY_BITS);
    if len >= V4_MAPPED_BITS && is_ipv4_mapped(bits) {
        let addr = Ipv4Addr::from(bits as u32);
        Ipv4Net::new(addr, len - V4_MAPPED_BITS)
            .map(IpNet::V4)
            .unwrap_or_else(|_| unreachable!("mapped length {len} leaves more than 32 bits"))
    } else {
        Ipv6Net::new(Ipv6Addr::from(bits), len)
            .map(IpNet::V6)
            .unwrap_or_else(|_| unreachable!("key length {len} exceeds 128 bits"))
    }
}

impl FromStr for Prefix {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl std::fmt::Display for Prefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.to_net().fmt(f)
    }
}
