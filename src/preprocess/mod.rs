pub mod error;
pub mod lexer;
pub mod lines;
pub mod run;
pub mod state;

pub use error::PreProcError;
pub use run::{Options, Run, RunConfig};
pub use state::SharedState;
