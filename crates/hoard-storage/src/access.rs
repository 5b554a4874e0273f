//! Direct vs. proxy access policy.

use hoard_core::models::file::{AccessLevel, AccessMode};

/// Decide how a file is reached.
///
/// Precedence, highest first: `Private` files are always proxied; otherwise a
/// channel-level hide-remote-URL setting wins; otherwise the global default
/// applies. A channel that cannot produce URLs of its own is proxied as well.
pub fn resolve_access_mode(
    access_level: AccessLevel,
    channel_hide_remote_url: Option<bool>,
    global_hide_remote_url: bool,
    channel_has_direct_urls: bool,
) -> AccessMode {
    if access_level == AccessLevel::Private {
        return AccessMode::Proxy;
    }
    let hide = channel_hide_remote_url.unwrap_or(global_hide_remote_url);
    if hide || !channel_has_direct_urls {
        AccessMode::Proxy
    } else {
        AccessMode::Direct
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_always_proxies() {
        for channel in [None, Some(false), Some(true)] {
            for global in [false, true] {
                assert_eq!(
                    resolve_access_mode(AccessLevel::Private, channel, global, true),
                    AccessMode::Proxy
                );
            }
        }
    }

    #[test]
    fn channel_override_beats_global() {
        assert_eq!(
            resolve_access_mode(AccessLevel::Public, Some(false), true, true),
            AccessMode::Direct
        );
        assert_eq!(
            resolve_access_mode(AccessLevel::Public, Some(true), false, true),
            AccessMode::Proxy
        );
        assert_eq!(
            resolve_access_mode(AccessLevel::Protected, None, true, true),
            AccessMode::Proxy
        );
        assert_eq!(
            resolve_access_mode(AccessLevel::Protected, None, false, true),
            AccessMode::Direct
        );
    }

    #[test]
    fn channel_without_urls_proxies() {
        assert_eq!(
            resolve_access_mode(AccessLevel::Public, Some(false), false, false),
            AccessMode::Proxy
        );
    }
}
