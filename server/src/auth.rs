//! Decides whether a publish or play request may go ahead.

use crate::stream_context::SessionId;
use crate::stream_path::StreamPath;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Publish,
    Play,
}

#[derive(Debug)]
pub struct AuthRequest<'a> {
    pub session_id: SessionId,
    pub app_name: &'a str,
    pub path: &'a StreamPath,
    pub kind: RequestKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    /// The request may proceed, on a different path if one is given
    Allow { path_override: Option<StreamPath> },
    Deny { reason: String },
}

impl AuthDecision {
    pub fn allow() -> AuthDecision {
        AuthDecision::Allow { path_override: None }
    }
}

/// Consulted for every publish and play request before the stream registry is touched
pub trait Authorizer: Send + Sync {
    fn authorize(&self, request: &AuthRequest<'_>) -> AuthDecision;
}

pub struct AllowAll;

impl Authorizer for AllowAll {
    fn authorize(&self, _request: &AuthRequest<'_>) -> AuthDecision {
        AuthDecision::allow()
    }
}

/// Only lets a publisher in when its stream name, or its `key` argument, is a known publish
/// key.  Playback is always allowed.
pub struct PublishKeyAuthorizer {
    keys: HashSet<String>,
}

impl PublishKeyAuthorizer {
    pub fn new<I, S>(keys: I) -> PublishKeyAuthorizer
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        PublishKeyAuthorizer {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }
}

impl Authorizer for PublishKeyAuthorizer {
    fn authorize(&self, request: &AuthRequest<'_>) -> AuthDecision {
        if request.kind == RequestKind::Play {
            return AuthDecision::allow();
        }

        let name_matches = self.keys.contains(request.path.name());
        let argument_matches = request
            .path
            .argument("key")
            .map_or(false, |key| self.keys.contains(key));

        if name_matches || argument_matches {
            AuthDecision::allow()
        } else {
            AuthDecision::Deny {
                reason: format!("Publishing to {} requires a valid key", request.path),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(path: &StreamPath, kind: RequestKind) -> AuthRequest<'_> {
        AuthRequest {
            session_id: 1,
            app_name: "live",
            path,
            kind,
        }
    }

    #[test]
    fn known_stream_name_may_publish() {
        let authorizer = PublishKeyAuthorizer::new(["secret"]);
        let path = StreamPath::parse("live", "secret");

        assert_eq!(authorizer.authorize(&request(&path, RequestKind::Publish)), AuthDecision::allow());
    }

    #[test]
    fn key_argument_may_publish() {
        let authorizer = PublishKeyAuthorizer::new(["secret"]);
        let path = StreamPath::parse("live", "camera?key=secret");

        assert_eq!(authorizer.authorize(&request(&path, RequestKind::Publish)), AuthDecision::allow());
    }

    #[test]
    fn unknown_key_is_denied_for_publish_only() {
        let authorizer = PublishKeyAuthorizer::new(["secret"]);
        let path = StreamPath::parse("live", "camera?key=wrong");

        assert!(matches!(
            authorizer.authorize(&request(&path, RequestKind::Publish)),
            AuthDecision::Deny { .. }
        ));

        assert_eq!(authorizer.authorize(&request(&path, RequestKind::Play)), AuthDecision::allow());
    }
}
