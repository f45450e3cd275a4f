// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Authentication and authorization rule engine.
//!
//! Backed by a json config file with three top level arrays:
//! `authentication`, `groups` and `authorization`. Lines starting with
//! `#` outside of strings are comments.

use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;

use crate::error::{Error, ErrorKind};

mod intersect;

pub use intersect::{is_subscribe_allowed, is_subscribe_denied};

/// Implicit group containing every user.
pub const ANY_GROUP_NAME: &str = "@any";

/// How a user proves its identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// `sha256(salt ∥ password)` compared against the stored hex digest,
    /// case-insensitive.
    Sha256,

    /// Byte-equal password compare.
    PlainPassword,

    /// The TLS layer asserts the identity via a client certificate.
    ClientCert,

    /// Any password is accepted. At most one user may use this method.
    Anonymous,

    /// Identity assigned to connections presenting no credentials at
    /// all. At most one user may use this method.
    Unauthenticated,
}

/// One `authentication` entry.
#[derive(Debug, Clone)]
pub struct Authentication {
    method: AuthMethod,
    digest: Option<String>,
    salt: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclType {
    Allow,
    Deny,
}

/// One `authorization` entry.
///
/// Rules are ordered; the highest rule number matching both the topic and
/// the user's membership set wins. Connections are denied when no rule
/// matches.
#[derive(Debug, Clone)]
pub struct AclRule {
    topic: String,
    tokens: Vec<String>,
    rule_nr: usize,

    pub_acl: Option<(AclType, BTreeSet<String>)>,
    sub_acl: Option<(AclType, BTreeSet<String>)>,
}

/// Remove comments from a json file. Comments start with `#` and are not
/// inside `' '` or `" "` quoted strings.
#[must_use]
pub fn json_remove_comments(input: &str) -> String {
    let mut inside_comment = false;
    let mut inside_single_quote = false;
    let mut inside_double_quote = false;

    let mut result = String::with_capacity(input.len());
    for c in input.chars() {
        if !inside_double_quote && !inside_single_quote && c == '#' {
            inside_comment = true;
        }
        if !inside_double_quote && c == '\'' {
            inside_single_quote = !inside_single_quote;
        }
        if !inside_single_quote && c == '"' {
            inside_double_quote = !inside_double_quote;
        }
        if !inside_double_quote && c == '\n' {
            inside_comment = false;
        }

        if !inside_comment {
            result.push(c);
        }
    }

    result
}

fn is_valid_group_name(name: &str) -> bool {
    name.starts_with('@')
}

fn is_valid_user_name(name: &str) -> bool {
    !name.is_empty() && !name.starts_with('@')
}

fn to_hex(digest: &[u8]) -> String {
    let mut result = String::with_capacity(digest.len() * 2);
    for byte in digest {
        result.push_str(&format!("{byte:02x}"));
    }
    result
}

fn sha256_hex(message: &[u8]) -> String {
    to_hex(&openssl::sha::sha256(message))
}

// Serde view of the json file.

#[derive(Debug, Deserialize)]
struct JsonAuthentication {
    name: String,
    method: AuthMethod,
    #[serde(default)]
    digest: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    salt: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JsonGroup {
    name: String,
    #[serde(default)]
    members: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct JsonAclEntry {
    #[serde(default, rename = "pub")]
    publish: Option<Vec<String>>,
    #[serde(default, rename = "sub")]
    subscribe: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct JsonAuthorization {
    topic: String,
    #[serde(default)]
    allow: Option<JsonAclEntry>,
    #[serde(default)]
    deny: Option<JsonAclEntry>,
}

#[derive(Debug, Deserialize)]
struct JsonSecurity {
    #[serde(default)]
    authentication: Vec<JsonAuthentication>,
    #[serde(default)]
    groups: Vec<JsonGroup>,
    #[serde(default)]
    authorization: Vec<JsonAuthorization>,
}

/// The security rule set.
#[derive(Debug, Clone, Default)]
pub struct Security {
    authentication: HashMap<String, Authentication>,
    groups: HashMap<String, Vec<String>>,
    authorization: Vec<AclRule>,

    anonymous: Option<String>,
    unauthenticated: Option<String>,
}

impl Security {
    /// Config used when no security file is given: a single anonymous
    /// user with full permissions.
    #[must_use]
    pub fn default_config() -> Self {
        let username = "anonymous";
        let mut security = Self::default();
        security.authentication.insert(
            username.to_string(),
            Authentication {
                method: AuthMethod::Anonymous,
                digest: None,
                salt: String::new(),
            },
        );
        security.anonymous = Some(username.to_string());
        security
            .groups
            .insert(ANY_GROUP_NAME.to_string(), Vec::new());

        let users: BTreeSet<String> = [username.to_string()].into_iter().collect();
        security.authorization.push(AclRule {
            topic: "#".to_string(),
            tokens: vec!["#".to_string()],
            rule_nr: 1,
            pub_acl: Some((AclType::Allow, users.clone())),
            sub_acl: Some((AclType::Allow, users)),
        });
        security
    }

    /// Load the rule set from a json file at `path`.
    ///
    /// # Errors
    ///
    /// Returns error if the file is unreadable, not valid json or fails
    /// validation.
    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::load_json(&content)
    }

    /// Parse the rule set from a json string.
    ///
    /// # Errors
    ///
    /// Returns error if the json is invalid or fails validation.
    pub fn load_json(input: &str) -> Result<Self, Error> {
        let stripped = json_remove_comments(input);
        let json: JsonSecurity = serde_json::from_str(&stripped)?;

        let mut security = Self::default();
        security
            .groups
            .insert(ANY_GROUP_NAME.to_string(), Vec::new());

        for entry in json.authentication {
            if !is_valid_user_name(&entry.name) {
                return Err(Error::from_string(
                    ErrorKind::ConfigError,
                    format!("An invalid username was specified: {}", entry.name),
                ));
            }

            let auth = match entry.method {
                AuthMethod::Sha256 => {
                    let digest = entry.digest.ok_or_else(|| {
                        Error::from_string(
                            ErrorKind::ConfigError,
                            format!("Missing digest for user: {}", entry.name),
                        )
                    })?;
                    Authentication {
                        method: AuthMethod::Sha256,
                        digest: Some(digest),
                        salt: entry.salt.unwrap_or_default(),
                    }
                }
                AuthMethod::PlainPassword => {
                    let password = entry.password.ok_or_else(|| {
                        Error::from_string(
                            ErrorKind::ConfigError,
                            format!("Missing password for user: {}", entry.name),
                        )
                    })?;
                    Authentication {
                        method: AuthMethod::PlainPassword,
                        digest: Some(password),
                        salt: String::new(),
                    }
                }
                AuthMethod::ClientCert => Authentication {
                    method: AuthMethod::ClientCert,
                    digest: None,
                    salt: String::new(),
                },
                AuthMethod::Anonymous => {
                    if let Some(anonymous) = &security.anonymous {
                        return Err(Error::from_string(
                            ErrorKind::ConfigError,
                            format!(
                                "Only a single anonymous user can be configured, anonymous user: {anonymous}"
                            ),
                        ));
                    }
                    security.anonymous = Some(entry.name.clone());
                    Authentication {
                        method: AuthMethod::Anonymous,
                        digest: None,
                        salt: String::new(),
                    }
                }
                AuthMethod::Unauthenticated => {
                    if let Some(unauthenticated) = &security.unauthenticated {
                        return Err(Error::from_string(
                            ErrorKind::ConfigError,
                            format!(
                                "Only a single unauthenticated user can be configured, unauthenticated user: {unauthenticated}"
                            ),
                        ));
                    }
                    security.unauthenticated = Some(entry.name.clone());
                    Authentication {
                        method: AuthMethod::Unauthenticated,
                        digest: None,
                        salt: String::new(),
                    }
                }
            };
            security.authentication.insert(entry.name, auth);
        }

        for group in json.groups {
            if !is_valid_group_name(&group.name) {
                return Err(Error::from_string(
                    ErrorKind::ConfigError,
                    format!("An invalid group name was specified: {}", group.name),
                ));
            }
            for member in &group.members {
                if !is_valid_user_name(member) {
                    return Err(Error::from_string(
                        ErrorKind::ConfigError,
                        format!("An invalid user name was specified: {member}"),
                    ));
                }
            }
            security.groups.insert(group.name, group.members);
        }

        let mut rule_nr = 0;
        for auth in json.authorization {
            if codec::topic::validate_sub_topic(&auth.topic).is_err() {
                return Err(Error::from_string(
                    ErrorKind::ConfigError,
                    format!("An invalid topic filter was specified: {}", auth.topic),
                ));
            }

            rule_nr += 1;
            let tokens: Vec<String> =
                codec::topic::tokenize(&auth.topic).map(str::to_string).collect();

            let to_set = |names: Option<Vec<String>>| -> BTreeSet<String> {
                names.unwrap_or_default().into_iter().collect()
            };

            let mut pub_acl = None;
            let mut sub_acl = None;
            if let Some(allow) = auth.allow {
                if allow.publish.is_some() {
                    pub_acl = Some((AclType::Allow, to_set(allow.publish)));
                }
                if allow.subscribe.is_some() {
                    sub_acl = Some((AclType::Allow, to_set(allow.subscribe)));
                }
            }
            if let Some(deny) = auth.deny {
                if deny.publish.is_some() {
                    pub_acl = Some((AclType::Deny, to_set(deny.publish)));
                }
                if deny.subscribe.is_some() {
                    sub_acl = Some((AclType::Deny, to_set(deny.subscribe)));
                }
            }

            security.authorization.push(AclRule {
                topic: auth.topic,
                tokens,
                rule_nr,
                pub_acl,
                sub_acl,
            });
        }

        security.validate()?;
        Ok(security)
    }

    fn validate(&self) -> Result<(), Error> {
        for (name, members) in &self.groups {
            for member in members {
                if !self.authentication.contains_key(member) {
                    return Err(Error::from_string(
                        ErrorKind::ConfigError,
                        format!(
                            "An invalid username was specified for group {name}: {member}"
                        ),
                    ));
                }
            }
        }

        let mut unsalted = Vec::new();
        for (name, auth) in &self.authentication {
            if auth.method == AuthMethod::Sha256 && auth.salt.is_empty() {
                unsalted.push(name.as_str());
            }
        }
        if !unsalted.is_empty() {
            log::warn!(
                "security: The following users have no salt specified: {}",
                unsalted.join(", ")
            );
        }

        for rule in &self.authorization {
            for acl in [&rule.pub_acl, &rule.sub_acl].into_iter().flatten() {
                for name in &acl.1 {
                    self.validate_entry(&rule.topic, name)?;
                }
            }
        }
        Ok(())
    }

    fn validate_entry(&self, context: &str, name: &str) -> Result<(), Error> {
        if is_valid_group_name(name) && !self.groups.contains_key(name) {
            return Err(Error::from_string(
                ErrorKind::ConfigError,
                format!("An invalid group name was specified for topic {context}: {name}"),
            ));
        }
        if is_valid_user_name(name) && !self.authentication.contains_key(name) {
            return Err(Error::from_string(
                ErrorKind::ConfigError,
                format!("An invalid username was specified for topic {context}: {name}"),
            ));
        }
        Ok(())
    }

    /// Username of the anonymous user, if one is configured.
    #[must_use]
    pub fn login_anonymous(&self) -> Option<&str> {
        self.anonymous.as_deref()
    }

    /// Username of the unauthenticated user, if one is configured.
    #[must_use]
    pub fn login_unauthenticated(&self) -> Option<&str> {
        self.unauthenticated.as_deref()
    }

    /// Check whether `username` is configured for client certificate
    /// login.
    #[must_use]
    pub fn login_cert(&self, username: &str) -> bool {
        self.authentication
            .get(username)
            .is_some_and(|auth| auth.method == AuthMethod::ClientCert)
    }

    /// Authenticate `username` with `password`.
    ///
    /// Returns the authenticated identity on success. An empty username
    /// maps to the anonymous user when one is configured.
    #[must_use]
    pub fn login(&self, username: &str, password: &[u8]) -> Option<String> {
        if username.is_empty() {
            return self.anonymous.clone();
        }

        let auth = self.authentication.get(username)?;
        match auth.method {
            AuthMethod::Sha256 => {
                let mut message = auth.salt.as_bytes().to_vec();
                message.extend_from_slice(password);
                let digest = auth.digest.as_deref()?;
                if digest.eq_ignore_ascii_case(&sha256_hex(&message)) {
                    Some(username.to_string())
                } else {
                    None
                }
            }
            AuthMethod::PlainPassword => {
                let digest = auth.digest.as_deref()?;
                if digest.as_bytes() == password {
                    Some(username.to_string())
                } else {
                    None
                }
            }
            // Client certificates are checked by the TLS layer.
            AuthMethod::ClientCert => None,
            AuthMethod::Anonymous | AuthMethod::Unauthenticated => Some(username.to_string()),
        }
    }

    /// The set of names authorization entries may match for `username`:
    /// the user itself, every group it belongs to, and `@any`.
    #[must_use]
    pub fn membership(&self, username: &str) -> BTreeSet<String> {
        let mut result = BTreeSet::new();
        result.insert(username.to_string());
        for (name, members) in &self.groups {
            if name == ANY_GROUP_NAME || members.iter().any(|m| m == username) {
                result.insert(name.clone());
            }
        }
        result
    }

    /// Check whether `username` may publish to `topic`.
    ///
    /// The highest numbered matching rule wins; deny if none matches.
    #[must_use]
    pub fn allow_publish(&self, username: &str, topic: &str) -> bool {
        let membership = self.membership(username);

        let mut result = AclType::Deny;
        let mut priority = 0;
        for rule in &self.authorization {
            let Some((acl_type, users)) = &rule.pub_acl else {
                continue;
            };
            if rule.rule_nr >= priority
                && codec::topic::topic_match(&rule.topic, topic)
                && !users.is_disjoint(&membership)
            {
                result = *acl_type;
                priority = rule.rule_nr;
            }
        }
        result == AclType::Allow
    }

    /// Compute the filters `username` is effectively granted when
    /// subscribing with `filter`.
    ///
    /// Allow rules contribute the intersection of their filter with the
    /// requested one; deny rules subtract their intersection from the
    /// granted set.
    #[must_use]
    pub fn auth_sub_topics(&self, username: &str, filter: &str) -> Vec<String> {
        let membership = self.membership(username);

        let mut granted: Vec<String> = Vec::new();
        for rule in &self.authorization {
            let Some((acl_type, users)) = &rule.sub_acl else {
                continue;
            };
            if users.is_disjoint(&membership) {
                continue;
            }
            match acl_type {
                AclType::Allow => {
                    if let Some(entry) = is_subscribe_allowed(&rule.tokens, filter) {
                        granted.push(entry);
                    }
                }
                AclType::Deny => {
                    granted.retain(|entry| !is_subscribe_denied(&rule.tokens, entry));
                }
            }
        }
        granted
    }

    /// Check whether `username` may subscribe with `filter`.
    #[must_use]
    pub fn allow_subscribe(&self, username: &str, filter: &str) -> bool {
        !self.auth_sub_topics(username, filter).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r##"
# Test rule set.
{
    "authentication": [
        # sha256 of "salthello"
        { "name": "alice", "method": "sha256",
          "digest": "CD31B3B98ECE60CB739C0BF770B2DE892AE0AD133F645513C3D83F08757A843A",
          "salt": "salt" },
        { "name": "bob", "method": "plain_password", "password": "secret" },
        { "name": "anon", "method": "anonymous" }
    ],
    "groups": [
        { "name": "@sensors", "members": ["alice", "bob"] }
    ],
    "authorization": [
        { "topic": "#", "allow": { "pub": ["@any"], "sub": ["@any"] } },
        { "topic": "admin/#", "deny": { "pub": ["@any"], "sub": ["@any"] } },
        { "topic": "admin/sensors/#", "allow": { "pub": ["@sensors"], "sub": ["@sensors"] } }
    ]
}
"##;

    #[test]
    fn test_login() {
        let security = Security::load_json(CONFIG).unwrap();

        assert_eq!(
            security.login("alice", b"hello"),
            Some("alice".to_string())
        );
        assert_eq!(security.login("alice", b"wrong"), None);
        assert_eq!(security.login("bob", b"secret"), Some("bob".to_string()));
        assert_eq!(security.login("bob", b"Secret"), None);
        assert_eq!(security.login("mallory", b"x"), None);
        // Empty username maps to the anonymous user.
        assert_eq!(security.login("", b"anything"), Some("anon".to_string()));
    }

    #[test]
    fn test_publish_rules() {
        let security = Security::load_json(CONFIG).unwrap();

        assert!(security.allow_publish("anon", "t/1"));
        // Rule 2 denies admin topics for everyone, rule 3 re-allows the
        // sensors subtree for group members.
        assert!(!security.allow_publish("anon", "admin/config"));
        assert!(!security.allow_publish("anon", "admin/sensors/1"));
        assert!(security.allow_publish("alice", "admin/sensors/1"));
    }

    #[test]
    fn test_subscribe_rules() {
        let security = Security::load_json(CONFIG).unwrap();

        assert!(security.allow_subscribe("anon", "t/#"));
        assert!(!security.allow_subscribe("anon", "admin/config"));
        assert!(security.allow_subscribe("alice", "admin/sensors/#"));

        // The intersection narrows a broad request to the allowed set.
        let granted = security.auth_sub_topics("alice", "admin/sensors/+");
        assert_eq!(granted, vec!["admin/sensors/+".to_string()]);
    }

    #[test]
    fn test_duplicate_anonymous_rejected() {
        let config = r#"{
            "authentication": [
                { "name": "a1", "method": "anonymous" },
                { "name": "a2", "method": "anonymous" }
            ],
            "authorization": []
        }"#;
        assert!(Security::load_json(config).is_err());
    }

    #[test]
    fn test_json_remove_comments() {
        let input = "{\n  \"a\": \"x#y\", # trailing comment\n  \"b\": 1\n}";
        let stripped = json_remove_comments(input);
        assert!(stripped.contains("x#y"));
        assert!(!stripped.contains("trailing"));
    }
}
