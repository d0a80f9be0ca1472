pub mod git;
pub mod util;
pub mod workspace;
