// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Wildcard filter intersection used by the subscribe authorization.

fn is_hash(level: &str) -> bool {
    level == "#"
}

fn is_plus(level: &str) -> bool {
    level == "+"
}

/// Intersect an allow rule's filter with a requested subscription filter.
///
/// Returns the narrowest filter covered by both, or `None` when the two
/// do not overlap. Wildcards on either side are narrowed by literal
/// levels on the other: `a/+` intersected with `+/b` yields `a/b`.
#[must_use]
pub fn is_subscribe_allowed(authorized_filter: &[String], subscription_filter: &str) -> Option<String> {
    let mut result: Option<String> = None;
    let mut append_result = |token: &str| match &mut result {
        Some(r) => {
            r.push('/');
            r.push_str(token);
        }
        None => result = Some(token.to_string()),
    };

    let sub_tokens: Vec<&str> = subscription_filter.split('/').collect();
    let mut auth_iter = authorized_filter.iter();

    for (index, sub) in sub_tokens.iter().enumerate() {
        let Some(auth) = auth_iter.next() else {
            // The rule's filter is shorter than the request and did not
            // end in `#`.
            return None;
        };

        if is_hash(auth) {
            append_result(&sub_tokens[index..].join("/"));
            return result;
        }

        if is_hash(sub) {
            append_result(auth);
            for rest in auth_iter {
                append_result(rest);
            }
            return result;
        }

        if is_plus(auth) {
            append_result(sub);
        } else if is_plus(sub) {
            append_result(auth);
        } else {
            if auth != sub {
                return None;
            }
            append_result(auth);
        }
    }

    if auth_iter.next().is_some() {
        return None;
    }

    result
}

/// Check whether a deny rule's filter covers the whole of a subscription
/// filter.
///
/// A partial overlap does not deny: a broad subscription like `#` cannot
/// be split into the not-denied remainder, so it survives a narrower
/// deny rule.
#[must_use]
pub fn is_subscribe_denied(deny_filter: &[String], subscription_filter: &str) -> bool {
    let mut result = true;
    let mut deny_iter = deny_filter.iter();
    let mut tokens_count = 0;

    for sub in subscription_filter.split('/') {
        tokens_count += 1;

        let Some(deny) = deny_iter.next() else {
            result = false;
            break;
        };

        if deny != sub {
            if is_hash(deny) {
                result = true;
                break;
            }
            if is_hash(sub) {
                result = false;
                break;
            }
            if is_plus(deny) {
                result = true;
                continue;
            }
            result = false;
            break;
        }
    }

    result && tokens_count == deny_filter.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(filter: &str) -> Vec<String> {
        filter.split('/').map(str::to_string).collect()
    }

    #[test]
    fn test_is_subscribe_allowed() {
        assert_eq!(
            is_subscribe_allowed(&tokens("a/b"), "a/b"),
            Some("a/b".to_string())
        );
        assert_eq!(is_subscribe_allowed(&tokens("a/b"), "a/c"), None);

        // Wildcards narrow each other.
        assert_eq!(
            is_subscribe_allowed(&tokens("a/+"), "+/b"),
            Some("a/b".to_string())
        );
        assert_eq!(
            is_subscribe_allowed(&tokens("#"), "a/b/#"),
            Some("a/b/#".to_string())
        );
        assert_eq!(
            is_subscribe_allowed(&tokens("a/b/#"), "a/#"),
            Some("a/b/#".to_string())
        );
        assert_eq!(is_subscribe_allowed(&tokens("a/b/c"), "a/b"), None);
    }

    #[test]
    fn test_is_subscribe_denied() {
        assert!(is_subscribe_denied(&tokens("a/b"), "a/b"));
        assert!(is_subscribe_denied(&tokens("a/#"), "a/b"));
        assert!(is_subscribe_denied(&tokens("a/+"), "a/b"));
        assert!(!is_subscribe_denied(&tokens("a/b"), "a/#"));
        assert!(!is_subscribe_denied(&tokens("a/b/c"), "a/b"));
        assert!(!is_subscribe_denied(&tokens("a"), "a/b"));
        assert!(!is_subscribe_denied(&tokens("x/#"), "a/b"));
    }
}
