//! Per-connection configuration.
use std::{env::var, fmt, str::FromStr};

use crate::proto::params::{ParamBuf, tags};

/// Keep-alive probe interval used when the configured value is negative.
pub const DUMMY_INTERVAL: u32 = 60; // seconds

const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Configured requirement level for transport encryption.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WireCrypt {
    /// Never encrypt; negotiation short-circuits as already complete.
    Disabled,
    /// Encrypt when a compatible key/plugin pair exists, else plaintext.
    #[default]
    Enabled,
    /// Refuse the connection unless encryption is established.
    Required,
}

/// Outcome of combining the client's and the server's wire-crypt levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireCryptResolution {
    Disabled,
    Enabled,
    Required,
    /// One side forbids what the other demands; the connection cannot be
    /// established.
    Broken,
}

impl WireCrypt {
    /// Integer form carried in the connection user-identification block.
    pub fn as_int(self) -> i32 {
        match self {
            Self::Disabled => 0,
            Self::Enabled => 1,
            Self::Required => 2,
        }
    }

    /// Inverse of [`as_int`][Self::as_int]; out-of-range values mean a
    /// newer peer and read as `Enabled`.
    pub fn from_int(v: i32) -> Self {
        match v {
            0 => Self::Disabled,
            2 => Self::Required,
            _ => Self::Enabled,
        }
    }

    /// Combine this side's level with the peer's.
    pub fn resolve(self, peer: WireCrypt) -> WireCryptResolution {
        use WireCrypt::*;
        use WireCryptResolution as R;
        match (self, peer) {
            (Disabled, Required) | (Required, Disabled) => R::Broken,
            (Disabled, _) | (_, Disabled) => R::Disabled,
            (Required, _) | (_, Required) => R::Required,
            (Enabled, Enabled) => R::Enabled,
        }
    }
}

impl FromStr for WireCrypt {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, ConfigError> {
        match s {
            _ if s.eq_ignore_ascii_case("disabled") => Ok(Self::Disabled),
            _ if s.eq_ignore_ascii_case("enabled") => Ok(Self::Enabled),
            _ if s.eq_ignore_ascii_case("required") => Ok(Self::Required),
            _ => Err(ConfigError { what: "wire-crypt level", value: s.into() }),
        }
    }
}

/// A configuration value could not be parsed.
#[derive(Debug, thiserror::Error)]
#[error("invalid {what}: {value:?}")]
pub struct ConfigError {
    what: &'static str,
    value: String,
}

/// Connection timeout values resolved for a port; the transport layer arms
/// the actual timers from these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Connection establishment timeout in seconds, `0` meaning none.
    pub connect_timeout: u32,
    /// Keep-alive probe interval in seconds.
    pub keepalive_interval: u32,
}

/// Protocol-level connection config.
#[derive(Debug, Clone)]
pub struct Config {
    /// This side's transport encryption requirement.
    pub wire_crypt: WireCrypt,
    /// Wire-crypt plugin names in preference order.
    pub crypt_plugins: Vec<String>,
    /// Connection establishment timeout in seconds, `0` meaning none.
    pub connect_timeout: u32,
    /// Keep-alive probe interval in seconds; negative falls back to
    /// [`DUMMY_INTERVAL`].
    pub keepalive_interval: i32,
    /// Transport buffer size; also the deflate drain chunk size.
    pub buffer_size: usize,
    /// Offer stream compression during connection establishment. Takes
    /// effect only when both sides offer it and the settled protocol
    /// supports it.
    pub compression: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            wire_crypt: WireCrypt::default(),
            crypt_plugins: Vec::new(),
            connect_timeout: 0,
            keepalive_interval: -1,
            buffer_size: DEFAULT_BUFFER_SIZE,
            compression: false,
        }
    }
}

impl Config {
    /// Retrieve configuration from environment variables.
    ///
    /// It reads:
    /// - `REMORA_WIRE_CRYPT`
    /// - `REMORA_CRYPT_PLUGINS` (space separated, preference order)
    /// - `REMORA_CONNECT_TIMEOUT`
    /// - `REMORA_KEEPALIVE`
    /// - `REMORA_BUFFER_SIZE`
    ///
    /// Unset or unparsable values fall back to the defaults.
    pub fn from_env() -> Config {
        let def = Config::default();

        macro_rules! env {
            ($name:literal, $def:expr) => {
                var($name).ok().and_then(|v| v.parse().ok()).unwrap_or($def)
            };
        }

        Config {
            wire_crypt: env!("REMORA_WIRE_CRYPT", def.wire_crypt),
            crypt_plugins: var("REMORA_CRYPT_PLUGINS")
                .map(|v| v.split_whitespace().map(str::to_owned).collect())
                .unwrap_or_default(),
            connect_timeout: env!("REMORA_CONNECT_TIMEOUT", def.connect_timeout),
            keepalive_interval: env!("REMORA_KEEPALIVE", def.keepalive_interval),
            buffer_size: env!("REMORA_BUFFER_SIZE", def.buffer_size),
            compression: env!("REMORA_COMPRESSION", def.compression),
        }
    }

    /// Resolve the timeout values for a new port: a caller-supplied
    /// parameter block overrides the configured connect timeout; a
    /// negative keep-alive interval falls back to [`DUMMY_INTERVAL`].
    pub fn resolve_timeouts(&self, params: Option<&ParamBuf>) -> Timeouts {
        let connect_timeout = params
            .and_then(|pb| pb.find_int(tags::CONNECT_TIMEOUT))
            .map(|v| v.max(0) as u32)
            .unwrap_or(self.connect_timeout);

        let keepalive_interval = match self.keepalive_interval {
            v if v < 0 => DUMMY_INTERVAL,
            v => v as u32,
        };

        Timeouts { connect_timeout, keepalive_interval }
    }
}

impl fmt::Display for WireCrypt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disabled => "disabled",
            Self::Enabled => "enabled",
            Self::Required => "required",
        })
    }
}
