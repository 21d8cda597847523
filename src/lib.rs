pub mod applet;
pub mod cli;
pub mod config;
pub mod interpreter;
pub mod parser;
pub mod registry;
pub mod stdlib;
pub mod store;

// Re-export main types
pub use applet::{AppletError, AppletLauncher, AppletRequest, AppletSession, AppletState};
pub use interpreter::{
    ExecutionContext, Interpreter, InterpreterOptions, Program, ProgramOutcome, ProgramResult,
    RuntimeError, Value,
};
pub use parser::{parse_program, ParseError};
pub use registry::{CommandRegistry, PipeRegistry, RegistryError};
