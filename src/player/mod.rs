pub mod command;
pub mod process;
pub mod state;
pub mod supervisor;

pub use command::{MediaKind, classify, default_screen_command, player_command};
pub use process::{PlayerHandle, PlayerLauncher, ProcessLauncher};
pub use state::StateWriter;
pub use supervisor::PlaybackSupervisor;
