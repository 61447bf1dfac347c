pub mod provider;
pub mod source;

pub use provider::{BackendProvider, PlaylistProvider, SampleProvider, sample_playlist};
pub use source::{PlaylistError, PlaylistSource};
