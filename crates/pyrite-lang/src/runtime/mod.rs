pub mod bridge;
pub mod cancel;
pub mod env;
pub mod interpreter;
pub mod output;
pub mod value;
