mod command;
mod progress;
mod runner;

#[allow(unused_imports)]
pub use command::{engine_executable, EngineCommand, EngineStage, RunMode};
#[allow(unused_imports)]
pub use progress::{
    frame_ratio_percent, is_frame_run_complete, is_init_complete, percent_token,
};
pub use runner::{EngineProcess, OutputChannel, OutputChunk};
