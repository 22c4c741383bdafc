/// Why the application turned down a publish or play request.  Each reason is answered with its
/// own status code and the session keeps running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestRejection {
    /// The authorization collaborator denied the request
    Unauthorized { reason: String },

    /// Another session is already publishing on the stream path
    AlreadyExists,

    /// The logical stream is already being used for publishing
    AlreadyPublishing,

    /// The logical stream (or the client) is already subscribed
    AlreadySubscribing,

    /// Nothing is being published on the requested stream path
    StreamNotReady,
}

/// The `(code, description)` pair sent back for a rejected publish
pub(super) fn publish_status(rejection: &RequestRejection) -> (&'static str, String) {
    match rejection {
        RequestRejection::Unauthorized { reason } => ("NetStream.Publish.Unauthorized", reason.clone()),
        RequestRejection::AlreadyExists => (
            "NetStream.Publish.BadName",
            "Stream is already being published".to_string(),
        ),
        RequestRejection::AlreadyPublishing => (
            "NetStream.Publish.BadConnection",
            "Stream is already publishing".to_string(),
        ),
        RequestRejection::AlreadySubscribing => (
            "NetStream.Publish.BadConnection",
            "Stream is already playing".to_string(),
        ),
        RequestRejection::StreamNotReady => (
            "NetStream.Publish.BadName",
            "Stream is not available for publishing".to_string(),
        ),
    }
}

/// The `(code, description)` pair sent back for a rejected play
pub(super) fn play_status(rejection: &RequestRejection) -> (&'static str, String) {
    match rejection {
        RequestRejection::Unauthorized { reason } => ("NetStream.Play.Unauthorized", reason.clone()),
        RequestRejection::StreamNotReady | RequestRejection::AlreadyExists => (
            "NetStream.Play.StreamNotFound",
            "No stream is being published with that name".to_string(),
        ),
        RequestRejection::AlreadyPublishing => (
            "NetStream.Play.BadConnection",
            "Stream is already publishing".to_string(),
        ),
        RequestRejection::AlreadySubscribing => (
            "NetStream.Play.BadConnection",
            "Stream is already playing".to_string(),
        ),
    }
}
