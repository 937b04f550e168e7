//! In-band wire-crypt negotiation.
//!
//! Strictly ordered, once per port, after the connection handshake and
//! before any traffic that must be protected: the client matches its
//! plugin preference list against each server-advertised key type, loads
//! the winner, sends the `Crypt` packet in the clear and block-receives
//! the confirmation, also in the clear. Only then does the port flag crypt
//! as complete; the whole exchange runs under one `&mut` borrow so no
//! other traffic can interleave.
use bytes::Bytes;

use super::Port;
use crate::{
    Result,
    config::WireCrypt,
    crypt::{CryptError, CryptKey, CryptProvider, KnownServerKey},
    proto::packet::{self, Packet, Response},
    status::{StatusVector, codes},
    transport::Transport,
};

impl<T: Transport> Port<T> {
    /// Run the client side of the negotiation with every key the auth
    /// phase produced. Ending up plaintext is only an error under a
    /// `Required` policy.
    pub async fn negotiate_crypt(
        &mut self,
        keys: Vec<CryptKey>,
        provider: &dyn CryptProvider,
    ) -> Result<()> {
        for key in keys {
            self.try_new_key(key, provider).await?;
        }
        if !self.crypt_complete && self.config.wire_crypt == WireCrypt::Required {
            return Err(CryptError::Required.into());
        }
        Ok(())
    }

    /// Offer one key against every advertised server key type. A key that
    /// matches nothing is kept for key types a later response may
    /// advertise.
    pub async fn try_new_key(
        &mut self,
        key: CryptKey,
        provider: &dyn CryptProvider,
    ) -> Result<bool> {
        for n in 0..self.known_server_keys.len() {
            let server_key = self.known_server_keys[n].clone();
            if self.try_key_type(&server_key, &key, provider).await? {
                return Ok(true);
            }
        }
        self.pending_keys.push(key);
        Ok(false)
    }

    async fn try_key_type(
        &mut self,
        server_key: &KnownServerKey,
        key: &CryptKey,
        provider: &dyn CryptProvider,
    ) -> Result<bool> {
        if self.crypt_complete {
            return Ok(true);
        }
        if server_key.key_type != key.name {
            return Ok(false);
        }

        // correct key type pair; a disabled policy completes as plaintext
        if self.config.wire_crypt == WireCrypt::Disabled {
            self.crypt_complete = true;
            log::debug!("port {}: wire crypt disabled by policy", self.life.id());
            return Ok(true);
        }

        // client preference order, server compatibility filter
        let preference = self.config.crypt_plugins.clone();
        for name in &preference {
            if !server_key.supports(name) {
                continue;
            }
            let Some(mut plugin) = provider.plugin(name) else {
                continue;
            };

            // a plugin-reported key setup failure aborts the connection
            if let Some(data) = server_key.specific_data(name) {
                plugin
                    .set_specific_data(&server_key.key_type, data)
                    .map_err(|e| self.fail(e.into()))?;
            }
            plugin.set_key(key).map_err(|e| self.fail(e.into()))?;

            // notify the server of the choice; crypt is not complete yet,
            // so this packet and the confirmation travel in the clear
            let crypt: Packet = packet::Crypt {
                key_type: key.name.clone(),
                plugin: name.clone(),
            }
            .into();
            self.send(&crypt).await?;

            let reply = self.receive().await?;
            self.check_response(reply)?;

            self.crypt_plugin = Some(plugin);
            self.crypt_complete = true;
            log::debug!(
                "port {}: wire crypt active, key type {:?}, plugin {:?}",
                self.life.id(),
                key.name,
                name,
            );
            return Ok(true);
        }

        Ok(false)
    }

    /// Run the server side of the negotiation for one received `Crypt`
    /// packet. The confirmation (or the failure report) goes out in the
    /// clear; returns whether crypt is now active.
    pub async fn accept_crypt(
        &mut self,
        crypt: packet::Crypt,
        keys: &[CryptKey],
        provider: &dyn CryptProvider,
    ) -> Result<bool> {
        let key = keys.iter().find(|k| k.name == crypt.key_type);
        let plugin = key.is_some().then(|| provider.plugin(&crypt.plugin)).flatten();

        let (Some(key), Some(mut plugin)) = (key, plugin) else {
            let failure = Response {
                object: 0,
                blob_id: 0,
                data: Bytes::new(),
                status: StatusVector::error(codes::CRYPT_PLUGIN),
            };
            self.send(&failure.into()).await?;
            return Ok(false);
        };

        let specific = self
            .known_server_keys
            .iter()
            .find(|k| k.key_type == crypt.key_type)
            .and_then(|k| k.specific_data(&crypt.plugin))
            .map(<[u8]>::to_vec);
        if let Some(data) = specific {
            plugin
                .set_specific_data(&crypt.key_type, &data)
                .map_err(|e| self.fail(e.into()))?;
        }
        plugin.set_key(key).map_err(|e| self.fail(e.into()))?;

        let ok = Response {
            object: 0,
            blob_id: 0,
            data: Bytes::new(),
            status: StatusVector::success(),
        };
        self.send(&ok.into()).await?;

        self.crypt_plugin = Some(plugin);
        self.crypt_complete = true;
        log::debug!(
            "port {}: wire crypt active, key type {:?}, plugin {:?}",
            self.life.id(),
            crypt.key_type,
            crypt.plugin,
        );
        Ok(true)
    }
}
