pub mod commands;
pub mod progress;
pub mod ui;
pub mod util;

pub use progress::{ConsoleRenderer, render_event};
pub use util::{CommandContext, read_input, read_inputs};
