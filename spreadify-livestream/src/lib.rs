// spreadify-livestream - live delivery pipeline for Spreadify
//
// - process/     - supervised encoder and forwarder processes
// - transcode/   - adaptive-bitrate HLS encoding per stream
// - relay/       - provisioning and forwarding to third-party platforms
// - livestream/  - stream lifecycle orchestration
//
// Streams are addressed by their stream key on ingest and by their record
// id for playback paths and room keys.

pub mod livestream;
pub mod process;
pub mod relay;
pub mod transcode;

pub use livestream::{ActiveStream, LifecycleEvent, StreamManager};
pub use process::{ProcessExit, ProcessTracker, SupervisedProcess};
pub use relay::{Destination, OAuthRefresher, RelayState, RelaySupervisor, RemoteTarget};
pub use transcode::{QualityLadder, TranscodeEngine, TranscodeSession};
