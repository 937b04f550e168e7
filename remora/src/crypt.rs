//! Wire encryption: key material, plugin seam, and negotiation data.
//!
//! The engine does not implement ciphers. It carries named key material,
//! matches the client's plugin preference list against the server's
//! advertised compatibility list, and hands the winning plugin the
//! server-supplied specific data (e.g. an initialization vector) plus the
//! key. Everything after the confirmed `Crypt` exchange passes through the
//! plugin; the negotiation packets themselves never do.
use bytes::Bytes;

use crate::proto::params::ParamBuf;

/// Tags of the server key advertisement block.
pub(crate) const TAG_KEY_TYPE: u8 = 1;
pub(crate) const TAG_KEY_PLUGINS: u8 = 2;
pub(crate) const TAG_PLUGIN_SPECIFIC: u8 = 3;

/// A wire-crypt negotiation fault.
///
/// Finding no compatible plugin/key pair is *not* an error (the connection
/// stays plaintext unless policy requires encryption); the variants here
/// all abort connection establishment.
#[derive(Debug, thiserror::Error)]
pub enum CryptError {
    #[error("wire encryption required but no compatible key/plugin pair")]
    Required,
    #[error("client and server wire-crypt requirements are incompatible")]
    Incompatible,
    #[error("key setup: {0}")]
    KeySetup(String),
    #[error("{0}: {1}")]
    Cipher(&'static str, String),
}

/// Named key material, as produced by a key-exchange-capable auth plugin.
///
/// Decryption material defaults to the encryption material when the key is
/// symmetric.
#[derive(Clone)]
pub struct CryptKey {
    pub name: String,
    encrypt: Vec<u8>,
    decrypt: Vec<u8>,
}

impl CryptKey {
    pub fn symmetric(name: impl Into<String>, key: impl Into<Vec<u8>>) -> Self {
        Self { name: name.into(), encrypt: key.into(), decrypt: Vec::new() }
    }

    pub fn asymmetric(
        name: impl Into<String>,
        encrypt: impl Into<Vec<u8>>,
        decrypt: impl Into<Vec<u8>>,
    ) -> Self {
        Self { name: name.into(), encrypt: encrypt.into(), decrypt: decrypt.into() }
    }

    pub fn encrypt_key(&self) -> &[u8] {
        &self.encrypt
    }

    pub fn decrypt_key(&self) -> &[u8] {
        if self.decrypt.is_empty() { &self.encrypt } else { &self.decrypt }
    }
}

impl std::fmt::Debug for CryptKey {
    // key material stays out of logs
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptKey")
            .field("name", &self.name)
            .field("encrypt", &self.encrypt.len())
            .field("decrypt", &self.decrypt.len())
            .finish()
    }
}

/// One key type the server can serve, with the plugin names compatible
/// with it and optional per-plugin specific data.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KnownServerKey {
    pub key_type: String,
    pub plugins: Vec<String>,
    pub(crate) specific: Vec<(String, Bytes)>,
}

impl KnownServerKey {
    pub fn supports(&self, plugin: &str) -> bool {
        self.plugins.iter().any(|p| p == plugin)
    }

    pub fn specific_data(&self, plugin: &str) -> Option<&[u8]> {
        self.specific
            .iter()
            .find(|(p, _)| p == plugin)
            .map(|(_, d)| &d[..])
    }
}

/// Pick the first of the client's `preference` list the server key is
/// compatible with: client preference order, server compatibility filter.
pub fn choose_plugin<'a>(preference: &'a [String], key: &KnownServerKey) -> Option<&'a str> {
    preference
        .iter()
        .map(String::as_str)
        .find(|p| key.supports(p))
}

/// Parse a server key advertisement block.
///
/// Entries arrive as `key-type`, then `key-plugins` (space-separated names,
/// opens the key), then any number of `plugin-specific` entries of the form
/// `plugin-name\0data`.
pub fn parse_known_keys(block: &ParamBuf) -> Vec<KnownServerKey> {
    let mut keys = Vec::new();
    let mut key_type = String::new();

    for (tag, value) in block.iter() {
        match tag {
            TAG_KEY_TYPE => {
                key_type = String::from_utf8_lossy(value).into_owned();
            }
            TAG_KEY_PLUGINS => {
                let plugins = String::from_utf8_lossy(value)
                    .split_whitespace()
                    .map(str::to_owned)
                    .collect();
                keys.push(KnownServerKey {
                    key_type: key_type.clone(),
                    plugins,
                    specific: Vec::new(),
                });
            }
            TAG_PLUGIN_SPECIFIC => {
                let Some(key) = keys.last_mut() else { continue };
                let Some(nul) = value.iter().position(|b| *b == 0) else { continue };
                let plugin = String::from_utf8_lossy(&value[..nul]).into_owned();
                let data = Bytes::copy_from_slice(&value[nul + 1..]);
                key.specific.push((plugin, data));
            }
            _ => {}
        }
    }

    keys
}

/// Write a server key advertisement block, the inverse of
/// [`parse_known_keys`]; used on the accepting side.
pub fn write_known_keys(keys: &[KnownServerKey], block: &mut ParamBuf) {
    for key in keys {
        block.insert_str(TAG_KEY_TYPE, &key.key_type);
        block.insert_str(TAG_KEY_PLUGINS, &key.plugins.join(" "));
        for (plugin, data) in &key.specific {
            let mut value = Vec::with_capacity(plugin.len() + 1 + data.len());
            value.extend_from_slice(plugin.as_bytes());
            value.push(0);
            value.extend_from_slice(data);
            block.insert_bytes(TAG_PLUGIN_SPECIFIC, &value);
        }
    }
}

/// A loaded wire encryption plugin.
///
/// Calls return results; a plugin failure never unwinds across the engine
/// boundary. A key-setup failure aborts the connection.
pub trait WireCryptPlugin: Send {
    /// Server-supplied data for the key type, e.g. an initialization
    /// vector, handed over before the key.
    fn set_specific_data(&mut self, key_type: &str, data: &[u8]) -> Result<(), CryptError>;

    /// Install the shared key material. Called once, after any specific
    /// data.
    fn set_key(&mut self, key: &CryptKey) -> Result<(), CryptError>;

    /// Encrypt a wire buffer in place.
    fn encrypt(&mut self, data: &mut [u8]) -> Result<(), CryptError>;

    /// Decrypt a wire buffer in place.
    fn decrypt(&mut self, data: &mut [u8]) -> Result<(), CryptError>;
}

/// Resolves wire-crypt plugins by name.
pub trait CryptProvider: Send + Sync {
    fn plugin(&self, name: &str) -> Option<Box<dyn WireCryptPlugin>>;
}

/// The empty provider: every lookup misses, negotiation always falls back
/// to plaintext (or fails under a `Required` policy).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPlugins;

impl CryptProvider for NoPlugins {
    fn plugin(&self, _: &str) -> Option<Box<dyn WireCryptPlugin>> {
        None
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! A deliberately weak cipher for exercising the negotiation and the
    //! port's wrap/unwrap paths.
    use super::*;

    #[derive(Default)]
    pub struct XorPlugin {
        key: Vec<u8>,
        iv: u8,
    }

    impl WireCryptPlugin for XorPlugin {
        fn set_specific_data(&mut self, _key_type: &str, data: &[u8]) -> Result<(), CryptError> {
            self.iv = data.first().copied().unwrap_or(0);
            Ok(())
        }

        fn set_key(&mut self, key: &CryptKey) -> Result<(), CryptError> {
            if key.encrypt_key().is_empty() {
                return Err(CryptError::KeySetup("empty key material".into()));
            }
            self.key = key.encrypt_key().to_vec();
            Ok(())
        }

        fn encrypt(&mut self, data: &mut [u8]) -> Result<(), CryptError> {
            for (i, b) in data.iter_mut().enumerate() {
                *b ^= self.key[i % self.key.len()] ^ self.iv;
            }
            Ok(())
        }

        fn decrypt(&mut self, data: &mut [u8]) -> Result<(), CryptError> {
            self.encrypt(data)
        }
    }

    /// Provider knowing a fixed set of plugin names, all backed by
    /// [`XorPlugin`].
    pub struct FixedProvider(pub Vec<&'static str>);

    impl CryptProvider for FixedProvider {
        fn plugin(&self, name: &str) -> Option<Box<dyn WireCryptPlugin>> {
            self.0
                .contains(&name)
                .then(|| Box::new(XorPlugin::default()) as Box<dyn WireCryptPlugin>)
        }
    }
}
