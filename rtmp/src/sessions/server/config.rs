/// The configuration options that govern how a RTMP server session should operate
#[derive(Clone, Debug)]
pub struct ServerSessionConfig {
    pub fms_version: String,

    /// Outbound chunk size announced to the client once it connects
    pub chunk_size: u32,

    /// Largest chunk size the client may switch to.  Anything bigger terminates the session.
    pub max_inbound_chunk_size: u32,
    pub peer_bandwidth: u32,
    pub window_ack_size: u32,
}

impl ServerSessionConfig {
    /// Creates a new server session config with overridable defaults
    pub fn new() -> ServerSessionConfig {
        ServerSessionConfig {
            fms_version: "FMS/3,0,1,1233".to_string(),
            chunk_size: 4096,
            max_inbound_chunk_size: 1_048_576,
            peer_bandwidth: 2_500_000,
            window_ack_size: 1_073_741_824,
        }
    }
}

impl Default for ServerSessionConfig {
    fn default() -> Self {
        ServerSessionConfig::new()
    }
}
