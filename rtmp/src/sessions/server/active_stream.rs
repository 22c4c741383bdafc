use super::PublishMode;

pub enum StreamState {
    Created,

    Publishing {
        stream_key: String,
        mode: PublishMode,
    },

    Playing {
        stream_key: String,
        paused: bool,
    },
}

pub struct ActiveStream {
    pub current_state: StreamState,
}

impl ActiveStream {
    pub fn publishing_key(&self) -> Option<&str> {
        match &self.current_state {
            StreamState::Publishing { stream_key, .. } => Some(stream_key),
            _ => None,
        }
    }

    pub fn playing_key(&self) -> Option<&str> {
        match &self.current_state {
            StreamState::Playing { stream_key, .. } => Some(stream_key),
            _ => None,
        }
    }
}
