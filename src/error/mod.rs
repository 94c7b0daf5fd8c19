mod io;
mod manifest;
mod parser;
mod runner;
mod tree;

pub use io::IoError;
pub use manifest::ManifestError;
pub use parser::ParserError;
pub use runner::RunnerError;
pub use tree::TreeError;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] IoError),

    #[error(transparent)]
    Parser(#[from] ParserError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Runner(#[from] RunnerError),
}

pub type Result<T> = std::result::Result<T, Error>;
