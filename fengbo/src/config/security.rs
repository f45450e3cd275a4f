// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Security section in config.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Security {
    /// Path to the security json file holding `authentication`, `groups`
    /// and `authorization` arrays. Lines starting with `#` outside of
    /// strings are comments.
    ///
    /// When unset, anonymous access with full permissions is configured.
    #[serde(default)]
    security_file: Option<PathBuf>,
}

impl Security {
    #[must_use]
    pub fn security_file(&self) -> Option<&Path> {
        self.security_file.as_deref()
    }
}
