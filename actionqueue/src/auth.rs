// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::{fmt, sync::Arc};

use parking_lot::RwLock;
use zeroize::Zeroizing;

/// Signing and encryption material of the logged-in user.
///
/// Handlers receive it when executing a task, so it never has to be part of a task context.
#[derive(Clone)]
pub struct AuthMaterial {
    user_address: String,
    signing_key: Zeroizing<Vec<u8>>,
    encryption_key: Zeroizing<Vec<u8>>,
}

impl AuthMaterial {
    pub fn new(
        user_address: impl Into<String>,
        signing_key: Vec<u8>,
        encryption_key: Vec<u8>,
    ) -> Self {
        Self {
            user_address: user_address.into(),
            signing_key: Zeroizing::new(signing_key),
            encryption_key: Zeroizing::new(encryption_key),
        }
    }

    pub fn user_address(&self) -> &str {
        &self.user_address
    }

    pub fn signing_key(&self) -> &[u8] {
        &self.signing_key
    }

    pub fn encryption_key(&self) -> &[u8] {
        &self.encryption_key
    }
}

impl fmt::Debug for AuthMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthMaterial")
            .field("user_address", &self.user_address)
            .field("signing_key", &"<redacted>")
            .field("encryption_key", &"<redacted>")
            .finish()
    }
}

/// Holds the current [`AuthMaterial`], if any.
#[derive(Debug, Default, Clone)]
pub(crate) struct AuthGate {
    material: Arc<RwLock<Option<Arc<AuthMaterial>>>>,
}

impl AuthGate {
    pub(crate) fn set(&self, material: AuthMaterial) {
        *self.material.write() = Some(Arc::new(material));
    }

    pub(crate) fn get(&self) -> Option<Arc<AuthMaterial>> {
        self.material.read().clone()
    }

    pub(crate) fn clear(&self) {
        self.material.write().take();
    }

    pub(crate) fn is_open(&self) -> bool {
        self.material.read().is_some()
    }
}
