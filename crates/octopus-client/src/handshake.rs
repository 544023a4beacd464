//! Connection identity and the per-open handshake.
//!
//! Every time the socket opens the client announces `{group, name}` and
//! treats the next inbound frame as the broker's verdict. A close drops the
//! connection back to unidentified; the next open starts over.

use octopus_protocol::{HandshakeReply, IdentityEnvelope};

use crate::config::ConnectOptions;
use crate::error::{ClientError, ClientResult};

/// Identity of one connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    group: String,
    name: Option<String>,
    identified: bool,
}

impl Identity {
    /// Validates and normalises `group`/`name` from connect options.
    ///
    /// Both are trimmed; the group must be non-empty, the name (when given)
    /// must be non-empty and differ from the group.
    pub fn from_options(options: &ConnectOptions) -> ClientResult<Self> {
        let group = options
            .group
            .as_deref()
            .ok_or(ClientError::GroupNotString)?
            .trim();
        if group.is_empty() {
            return Err(ClientError::GroupEmpty);
        }

        let name = match options.name.as_deref() {
            None => None,
            Some(name) => {
                let name = name.trim();
                if name.is_empty() {
                    return Err(ClientError::NameEmpty);
                }
                if name == group {
                    return Err(ClientError::NameEqualsGroup);
                }
                Some(name.to_string())
            }
        };

        Ok(Self {
            group: group.to_string(),
            name,
            identified: false,
        })
    }

    /// Group joined by this connection.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Name, either chosen locally or assigned by the broker.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns true once the broker accepted the identity.
    pub fn is_identified(&self) -> bool {
        self.identified
    }

    /// Envelope announcing this identity.
    pub fn envelope(&self) -> IdentityEnvelope {
        IdentityEnvelope::new(self.group.clone(), self.name.clone())
    }

    /// Applies the broker's verdict.
    ///
    /// On success the connection becomes identified and adopts the
    /// broker-assigned name if none was set locally. A broker-assigned name
    /// equal to the group is ignored.
    pub fn accept(&mut self, reply: &HandshakeReply) -> ClientResult<()> {
        if reply.is_failure() {
            self.identified = false;
            return Err(ClientError::IdentityRejected {
                reason: reply.failure_reason().to_string(),
            });
        }

        self.identified = true;
        if self.name.is_none() {
            self.name = reply
                .identity
                .as_deref()
                .map(str::trim)
                .filter(|name| !name.is_empty() && *name != self.group)
                .map(str::to_string);
        }
        Ok(())
    }

    /// Drops back to unidentified after a close.
    pub fn reset(&mut self) {
        self.identified = false;
    }
}
