pub mod encode;
pub mod modules;
pub mod resolve;
pub mod run;
