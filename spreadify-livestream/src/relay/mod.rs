//! Relaying live streams to third-party platforms
//!
//! Each platform implements [`Destination`]; the [`RelaySupervisor`] only
//! talks to that interface.

pub mod destination;
pub mod facebook;
pub mod linkedin;
pub mod oauth;
pub mod supervisor;
pub mod twitch;
pub mod youtube;

pub use destination::{http_client, Destination, RemoteTarget};
pub use facebook::FacebookDestination;
pub use linkedin::LinkedInDestination;
pub use oauth::OAuthRefresher;
pub use supervisor::{RelayState, RelaySupervisor};
pub use twitch::TwitchDestination;
pub use youtube::YouTubeDestination;
